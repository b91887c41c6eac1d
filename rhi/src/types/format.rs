//! Texel and element formats.

/// Format of a texel, vertex element or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// No format. Used for raw buffers and typeless views.
    #[default]
    Unknown,
    /// 8-bit RGBA, unsigned normalized.
    R8G8B8A8Unorm,
    /// 8-bit BGRA, unsigned normalized. Typical swap chain format.
    B8G8R8A8Unorm,
    /// 16-bit float RGBA.
    R16G16B16A16Float,
    /// 32-bit float RGBA.
    R32G32B32A32Float,
    /// 32-bit float RGB.
    R32G32B32Float,
    /// 32-bit float RG.
    R32G32Float,
    /// 32-bit float R.
    R32Float,
    /// 32-bit unsigned integer R. Also used for 32-bit indices.
    R32Uint,
    /// 16-bit unsigned integer R. Also used for 16-bit indices.
    R16Uint,
    /// 32-bit float depth.
    D32Float,
    /// 24-bit depth with 8-bit stencil.
    D24UnormS8Uint,
}

impl Format {
    /// Size of one element or texel in bytes. Zero for [`Format::Unknown`].
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R16Uint => 2,
            Self::R8G8B8A8Unorm
            | Self::B8G8R8A8Unorm
            | Self::R32Float
            | Self::R32Uint
            | Self::D32Float
            | Self::D24UnormS8Uint => 4,
            Self::R16G16B16A16Float | Self::R32G32Float => 8,
            Self::R32G32B32Float => 12,
            Self::R32G32B32A32Float => 16,
        }
    }

    /// Check if this is a depth or depth-stencil format.
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8Uint)
    }

    /// Check if the format can be used for an index buffer.
    pub fn is_index(self) -> bool {
        matches!(self, Self::R16Uint | Self::R32Uint)
    }
}
