//! Command allocators.

use std::sync::Arc;

use crate::backend::{AllocatorId, GpuBackend};
use crate::error::GraphicsResult;
use crate::types::CommandListType;

/// Backing memory for recorded commands.
///
/// An allocator must not be reset while the GPU still executes lists that
/// were recorded into it. Command lists and compiled lists hold an `Arc` to
/// their allocator so it outlives every submission that uses it.
pub struct CommandAllocator {
    backend: Arc<dyn GpuBackend>,
    id: AllocatorId,
    list_type: CommandListType,
}

impl CommandAllocator {
    /// Create an allocator for lists of `list_type`.
    pub fn new(backend: Arc<dyn GpuBackend>, list_type: CommandListType) -> GraphicsResult<Self> {
        let id = backend.create_command_allocator(list_type)?;
        log::debug!("Created {list_type:?} command allocator {id:?}");
        Ok(Self {
            backend,
            id,
            list_type,
        })
    }

    /// Reclaim all command memory.
    pub fn reset(&self) -> GraphicsResult<()> {
        log::trace!("Resetting command allocator {:?}", self.id);
        self.backend.reset_command_allocator(self.id)
    }

    /// Get the native id.
    pub fn native_id(&self) -> AllocatorId {
        self.id
    }

    /// Type of the lists this allocator serves.
    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        self.backend.destroy_command_allocator(self.id);
    }
}

impl std::fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAllocator")
            .field("id", &self.id)
            .field("list_type", &self.list_type)
            .finish()
    }
}
