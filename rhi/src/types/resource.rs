//! Resource descriptors, flags and GPU access states.

use bitflags::bitflags;

use super::Format;

/// Dimensionality of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceDimension {
    /// Linear buffer. `width` is its size in bytes.
    #[default]
    Buffer,
    /// Two-dimensional texture.
    Texture2D,
}

bitflags! {
    /// Usage flags a resource is created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        /// Resource can be bound as a render target.
        const ALLOW_RENDER_TARGET = 1 << 0;
        /// Resource can be bound as a depth-stencil target.
        const ALLOW_DEPTH_STENCIL = 1 << 1;
        /// Resource can be bound for unordered access.
        const ALLOW_UNORDERED_ACCESS = 1 << 2;
        /// Resource can never be read through a shader resource view.
        const DENY_SHADER_RESOURCE = 1 << 3;
    }
}

bitflags! {
    /// GPU access state of a resource, as declared by resource barriers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceStates: u32 {
        /// Common state. Also the presentation state.
        const COMMON = 0;
        /// Read as vertex or constant buffer.
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        /// Read as index buffer.
        const INDEX_BUFFER = 1 << 1;
        /// Written as render target.
        const RENDER_TARGET = 1 << 2;
        /// Read or written through an unordered access view.
        const UNORDERED_ACCESS = 1 << 3;
        /// Written as depth buffer.
        const DEPTH_WRITE = 1 << 4;
        /// Read as depth buffer.
        const DEPTH_READ = 1 << 5;
        /// Read by non-pixel shader stages.
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        /// Read by the pixel shader stage.
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        /// Destination of a copy.
        const COPY_DEST = 1 << 8;
        /// Source of a copy.
        const COPY_SOURCE = 1 << 9;
        /// Required initial state of upload heap resources.
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::COPY_SOURCE.bits();
    }
}

impl ResourceStates {
    /// State of a back buffer handed to the presentation engine.
    pub const PRESENT: Self = Self::COMMON;

    /// Whether this state includes any write access.
    pub fn is_write(self) -> bool {
        self.intersects(
            Self::RENDER_TARGET | Self::UNORDERED_ACCESS | Self::DEPTH_WRITE | Self::COPY_DEST,
        )
    }
}

/// Descriptor for creating a buffer or texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    /// Debug label for the resource.
    pub label: Option<String>,
    /// Buffer or texture.
    pub dimension: ResourceDimension,
    /// Width in texels, or size in bytes for buffers.
    pub width: u64,
    /// Height in texels. Always 1 for buffers.
    pub height: u32,
    /// Array size. Always 1 for buffers.
    pub depth_or_array_size: u16,
    /// Mip level count. Always 1 for buffers.
    pub mip_levels: u16,
    /// Texel format. [`Format::Unknown`] for buffers.
    pub format: Format,
    /// Usage flags.
    pub flags: ResourceFlags,
}

impl ResourceDescriptor {
    /// Create a buffer descriptor of `size` bytes.
    pub fn buffer(size: u64) -> Self {
        Self {
            label: None,
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: Format::Unknown,
            flags: ResourceFlags::empty(),
        }
    }

    /// Create a 2D texture descriptor.
    pub fn texture_2d(width: u32, height: u32, format: Format) -> Self {
        Self {
            label: None,
            dimension: ResourceDimension::Texture2D,
            width: u64::from(width),
            height,
            depth_or_array_size: 1,
            mip_levels: 1,
            format,
            flags: ResourceFlags::empty(),
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the usage flags.
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, mip_levels: u16) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Check if this describes a buffer.
    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    /// Bytes in one row of the top mip level. Equal to the size for buffers.
    pub fn row_pitch(&self) -> u64 {
        match self.dimension {
            ResourceDimension::Buffer => self.width,
            ResourceDimension::Texture2D => self.width * u64::from(self.format.bytes_per_pixel()),
        }
    }

    /// Size of the top mip level in bytes, or the buffer size.
    pub fn size_in_bytes(&self) -> u64 {
        match self.dimension {
            ResourceDimension::Buffer => self.width,
            ResourceDimension::Texture2D => {
                self.row_pitch() * u64::from(self.height) * u64::from(self.depth_or_array_size)
            }
        }
    }
}

impl Default for ResourceDescriptor {
    fn default() -> Self {
        Self::buffer(0)
    }
}
