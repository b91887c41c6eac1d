//! Root signatures: the binding layout shared by pipelines and command lists.

use std::sync::Arc;

use bitflags::bitflags;

use crate::backend::{GpuBackend, RootSignatureId};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::SamplerDescription;

/// Root signatures are limited to 64 DWORDs of root arguments.
pub const MAX_ROOT_SIGNATURE_DWORDS: u32 = 64;

/// Kind of descriptors a table range covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

/// A run of consecutive registers inside a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub range_type: DescriptorRangeType,
    pub count: u32,
    pub base_register: u32,
    pub register_space: u32,
}

impl DescriptorRange {
    /// Range of `count` descriptors starting at register `base_register` in space 0.
    pub fn new(range_type: DescriptorRangeType, count: u32, base_register: u32) -> Self {
        Self {
            range_type,
            count,
            base_register,
            register_space: 0,
        }
    }
}

/// Shader stages that can see a root parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderVisibility {
    #[default]
    All,
    Vertex,
    Pixel,
}

/// One root argument slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootParameter {
    /// Pointer to a range of a shader-visible descriptor heap.
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
        visibility: ShaderVisibility,
    },
    /// Inline constant buffer address.
    ConstantBufferView {
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
    /// Inline 32-bit constants.
    Constants {
        count: u32,
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
}

impl RootParameter {
    /// Number of DWORDs this parameter occupies in the root arguments.
    pub fn cost_in_dwords(&self) -> u32 {
        match self {
            Self::DescriptorTable { .. } => 1,
            Self::ConstantBufferView { .. } => 2,
            Self::Constants { count, .. } => *count,
        }
    }
}

/// A sampler baked into the root signature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSampler {
    pub sampler: SamplerDescription,
    pub register: u32,
    pub space: u32,
    pub visibility: ShaderVisibility,
}

bitflags! {
    /// Root signature creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RootSignatureFlags: u32 {
        /// Pipelines using this root signature have an input layout.
        const ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT = 1 << 0;
    }
}

/// Descriptor for creating a root signature.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RootSignatureDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Root parameters in index order.
    pub parameters: Vec<RootParameter>,
    /// Samplers baked into the signature.
    pub static_samplers: Vec<StaticSampler>,
    /// Creation flags.
    pub flags: RootSignatureFlags,
}

impl RootSignatureDescriptor {
    /// Create an empty root signature descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Append a root parameter.
    pub fn with_parameter(mut self, parameter: RootParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Append a descriptor table parameter.
    pub fn with_descriptor_table(self, ranges: Vec<DescriptorRange>, visibility: ShaderVisibility) -> Self {
        self.with_parameter(RootParameter::DescriptorTable { ranges, visibility })
    }

    /// Append a static sampler.
    pub fn with_static_sampler(mut self, sampler: StaticSampler) -> Self {
        self.static_samplers.push(sampler);
        self
    }

    /// Set creation flags.
    pub fn with_flags(mut self, flags: RootSignatureFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Total root argument size in DWORDs.
    pub fn cost_in_dwords(&self) -> u32 {
        self.parameters.iter().map(RootParameter::cost_in_dwords).sum()
    }

    /// Check the layout rules a native serializer enforces.
    pub fn validate(&self) -> GraphicsResult<()> {
        for (index, parameter) in self.parameters.iter().enumerate() {
            match parameter {
                RootParameter::DescriptorTable { ranges, .. } => {
                    if ranges.is_empty() {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "root parameter {index}: descriptor table has no ranges"
                        )));
                    }
                    if ranges.iter().any(|r| r.count == 0) {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "root parameter {index}: descriptor range with zero descriptors"
                        )));
                    }
                    let samplers = ranges
                        .iter()
                        .filter(|r| r.range_type == DescriptorRangeType::Sampler)
                        .count();
                    if samplers != 0 && samplers != ranges.len() {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "root parameter {index}: sampler ranges cannot share a table with views"
                        )));
                    }
                }
                RootParameter::Constants { count: 0, .. } => {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "root parameter {index}: zero root constants"
                    )));
                }
                _ => {}
            }
        }

        let cost = self.cost_in_dwords();
        if cost > MAX_ROOT_SIGNATURE_DWORDS {
            return Err(GraphicsError::InvalidParameter(format!(
                "root signature uses {cost} DWORDs, limit is {MAX_ROOT_SIGNATURE_DWORDS}"
            )));
        }
        Ok(())
    }
}

/// A created root signature.
pub struct RootSignature {
    backend: Arc<dyn GpuBackend>,
    id: RootSignatureId,
    descriptor: RootSignatureDescriptor,
}

impl RootSignature {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: RootSignatureDescriptor,
    ) -> GraphicsResult<Self> {
        descriptor.validate()?;
        let id = backend.create_root_signature(&descriptor)?;
        log::debug!(
            "Created root signature {} with {} parameters",
            descriptor.label.as_deref().unwrap_or("(unnamed)"),
            descriptor.parameters.len()
        );
        Ok(Self {
            backend,
            id,
            descriptor,
        })
    }

    /// Get the native id.
    pub fn native_id(&self) -> RootSignatureId {
        self.id
    }

    /// Get the descriptor this signature was created from.
    pub fn descriptor(&self) -> &RootSignatureDescriptor {
        &self.descriptor
    }

    /// Number of root parameters.
    pub fn parameter_count(&self) -> u32 {
        self.descriptor.parameters.len() as u32
    }

    /// Get a root parameter by index.
    pub fn parameter(&self, index: u32) -> Option<&RootParameter> {
        self.descriptor.parameters.get(index as usize)
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        self.backend.destroy_root_signature(self.id);
    }
}

impl std::fmt::Debug for RootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSignature")
            .field("id", &self.id)
            .field("label", &self.descriptor.label)
            .field("parameters", &self.descriptor.parameters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv_table() -> RootParameter {
        RootParameter::DescriptorTable {
            ranges: vec![DescriptorRange::new(DescriptorRangeType::ShaderResource, 2, 0)],
            visibility: ShaderVisibility::Pixel,
        }
    }

    #[test]
    fn test_valid_layout() {
        let desc = RootSignatureDescriptor::new()
            .with_parameter(srv_table())
            .with_parameter(RootParameter::ConstantBufferView {
                register: 0,
                space: 0,
                visibility: ShaderVisibility::All,
            })
            .with_parameter(RootParameter::Constants {
                count: 4,
                register: 1,
                space: 0,
                visibility: ShaderVisibility::Vertex,
            });
        assert_eq!(desc.cost_in_dwords(), 7);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_mixed_sampler_table_rejected() {
        let desc = RootSignatureDescriptor::new().with_descriptor_table(
            vec![
                DescriptorRange::new(DescriptorRangeType::ShaderResource, 1, 0),
                DescriptorRange::new(DescriptorRangeType::Sampler, 1, 0),
            ],
            ShaderVisibility::Pixel,
        );
        assert!(matches!(
            desc.validate(),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_root_size_limit() {
        let desc = RootSignatureDescriptor::new().with_parameter(RootParameter::Constants {
            count: MAX_ROOT_SIGNATURE_DWORDS + 1,
            register: 0,
            space: 0,
            visibility: ShaderVisibility::All,
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_empty_table_rejected() {
        let desc = RootSignatureDescriptor::new().with_descriptor_table(vec![], ShaderVisibility::All);
        assert!(desc.validate().is_err());
    }
}
