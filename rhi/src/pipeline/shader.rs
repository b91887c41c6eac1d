//! Compiled shader bytecode.

use std::sync::Arc;

/// Pipeline stage a shader runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

/// Externally compiled shader bytecode.
///
/// Bytecode is produced by an offline compiler and is opaque to this crate.
#[derive(Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    stage: ShaderStage,
    bytes: Arc<[u8]>,
    entry_point: String,
}

impl ShaderBytecode {
    /// Wrap compiled bytecode.
    pub fn new(stage: ShaderStage, bytes: impl Into<Arc<[u8]>>, entry_point: impl Into<String>) -> Self {
        Self {
            stage,
            bytes: bytes.into(),
            entry_point: entry_point.into(),
        }
    }

    /// Get the shader stage.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Get the raw bytecode.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the entry point name.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Check if there is no bytecode.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for ShaderBytecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderBytecode")
            .field("stage", &self.stage)
            .field("entry_point", &self.entry_point)
            .field("len", &self.bytes.len())
            .finish()
    }
}
