//! View descriptions written into descriptor heap slots.

use super::{DescriptorHeapType, Format};

/// Describes a constant buffer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConstantBufferViewDescription {
    /// GPU virtual address of the first byte.
    pub buffer_location: u64,
    /// Size of the view. Must be a multiple of 256.
    pub size_in_bytes: u32,
}

/// Subresource range a shader resource or unordered access view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    /// Structured or raw range of a buffer.
    Buffer {
        first_element: u64,
        num_elements: u32,
        structure_byte_stride: u32,
    },
    /// Mip range of a 2D texture.
    Texture2D { most_detailed_mip: u32, mip_levels: u32 },
}

impl Default for ViewDimension {
    fn default() -> Self {
        Self::Texture2D {
            most_detailed_mip: 0,
            mip_levels: 1,
        }
    }
}

/// Describes a shader resource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderResourceViewDescription {
    pub format: Format,
    pub dimension: ViewDimension,
}

/// Describes an unordered access view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UnorderedAccessViewDescription {
    pub format: Format,
    pub dimension: ViewDimension,
}

/// Describes a render target view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderTargetViewDescription {
    pub format: Format,
    pub mip_slice: u32,
}

/// Describes a depth-stencil view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthStencilViewDescription {
    pub format: Format,
    pub mip_slice: u32,
    /// Bind depth as read-only.
    pub read_only_depth: bool,
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Point,
    Linear,
    Anisotropic,
}

/// Texture addressing mode outside [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    Wrap,
    Mirror,
    #[default]
    Clamp,
    Border,
}

/// Comparison function for depth testing and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComparisonFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Describes a sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDescription {
    pub filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    /// Comparison function for shadow sampling.
    pub comparison: Option<ComparisonFunction>,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl SamplerDescription {
    /// Linear filtering sampler with wrapping addressing.
    pub fn linear() -> Self {
        Self {
            filter: FilterMode::Linear,
            ..Self::default().with_address_mode(AddressMode::Wrap)
        }
    }

    /// Point filtering sampler with clamped addressing.
    pub fn point() -> Self {
        Self::default()
    }

    /// Set address mode for all coordinates.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_u = mode;
        self.address_v = mode;
        self.address_w = mode;
        self
    }

    /// Set comparison function for depth sampling.
    pub fn with_comparison(mut self, comparison: ComparisonFunction) -> Self {
        self.comparison = Some(comparison);
        self
    }

    /// Set anisotropic filtering level.
    pub fn with_anisotropy(mut self, level: u32) -> Self {
        self.filter = FilterMode::Anisotropic;
        self.max_anisotropy = level;
        self
    }
}

impl Default for SamplerDescription {
    fn default() -> Self {
        Self {
            filter: FilterMode::Point,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            comparison: None,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

/// Any view that can occupy a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewDescription {
    ConstantBuffer(ConstantBufferViewDescription),
    ShaderResource(ShaderResourceViewDescription),
    UnorderedAccess(UnorderedAccessViewDescription),
    RenderTarget(RenderTargetViewDescription),
    DepthStencil(DepthStencilViewDescription),
    Sampler(SamplerDescription),
}

impl ViewDescription {
    /// Descriptor heap type that can hold this view.
    pub fn heap_type(&self) -> DescriptorHeapType {
        match self {
            Self::ConstantBuffer(_) | Self::ShaderResource(_) | Self::UnorderedAccess(_) => {
                DescriptorHeapType::CbvSrvUav
            }
            Self::RenderTarget(_) => DescriptorHeapType::Rtv,
            Self::DepthStencil(_) => DescriptorHeapType::Dsv,
            Self::Sampler(_) => DescriptorHeapType::Sampler,
        }
    }

    /// Whether this view needs a backing resource.
    pub fn requires_resource(&self) -> bool {
        !matches!(self, Self::Sampler(_) | Self::ConstantBuffer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_heap_types() {
        let cbv = ViewDescription::ConstantBuffer(ConstantBufferViewDescription::default());
        assert_eq!(cbv.heap_type(), DescriptorHeapType::CbvSrvUav);
        let rtv = ViewDescription::RenderTarget(RenderTargetViewDescription::default());
        assert_eq!(rtv.heap_type(), DescriptorHeapType::Rtv);
        let sampler = ViewDescription::Sampler(SamplerDescription::linear());
        assert_eq!(sampler.heap_type(), DescriptorHeapType::Sampler);
        assert!(!sampler.requires_resource());
    }

    #[test]
    fn test_sampler_presets() {
        let linear = SamplerDescription::linear();
        assert_eq!(linear.filter, FilterMode::Linear);
        assert_eq!(linear.address_u, AddressMode::Wrap);

        let shadow = SamplerDescription::point().with_comparison(ComparisonFunction::LessEqual);
        assert_eq!(shadow.comparison, Some(ComparisonFunction::LessEqual));
    }
}
