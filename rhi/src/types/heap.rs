//! Memory heap and descriptor heap types.

use bitflags::bitflags;

/// Memory heap a resource is allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapType {
    /// GPU-local memory. Not CPU-mappable.
    #[default]
    Default,
    /// CPU-writable, GPU-readable memory. Persistently mappable.
    Upload,
    /// GPU-writable, CPU-readable memory.
    Readback,
}

impl HeapType {
    /// Whether the CPU may write through a mapping of this heap.
    pub fn is_cpu_writable(self) -> bool {
        self == Self::Upload
    }

    /// Whether the CPU may read through a mapping of this heap.
    pub fn is_cpu_readable(self) -> bool {
        self == Self::Readback
    }
}

/// Kind of descriptor stored in a descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    /// Samplers.
    Sampler,
    /// Render target views.
    Rtv,
    /// Depth stencil views.
    Dsv,
}

impl DescriptorHeapType {
    /// All heap types, in index order.
    pub const ALL: [Self; 4] = [Self::CbvSrvUav, Self::Sampler, Self::Rtv, Self::Dsv];

    /// Dense index for enum-indexed tables.
    pub fn index(self) -> usize {
        match self {
            Self::CbvSrvUav => 0,
            Self::Sampler => 1,
            Self::Rtv => 2,
            Self::Dsv => 3,
        }
    }

    /// Whether heaps of this type may be bound to shaders.
    pub fn can_be_shader_visible(self) -> bool {
        matches!(self, Self::CbvSrvUav | Self::Sampler)
    }
}

bitflags! {
    /// Creation flags for a descriptor heap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DescriptorHeapFlags: u32 {
        /// The heap can be bound with `set_descriptor_heaps` and read by shaders.
        const SHADER_VISIBLE = 1 << 0;
    }
}

/// Descriptor for creating a descriptor heap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorHeapDescriptor {
    /// Debug label for the heap.
    pub label: Option<String>,
    /// Kind of descriptors stored.
    pub heap_type: DescriptorHeapType,
    /// Number of descriptor slots.
    pub count: u32,
    /// Creation flags.
    pub flags: DescriptorHeapFlags,
}

impl DescriptorHeapDescriptor {
    /// Create a new descriptor heap descriptor.
    pub fn new(heap_type: DescriptorHeapType, count: u32, flags: DescriptorHeapFlags) -> Self {
        Self {
            label: None,
            heap_type,
            count,
            flags,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether the heap is shader visible.
    pub fn is_shader_visible(&self) -> bool {
        self.flags.contains(DescriptorHeapFlags::SHADER_VISIBLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_type_indices_are_dense() {
        for (i, ty) in DescriptorHeapType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
        }
    }

    #[test]
    fn test_shader_visibility() {
        assert!(DescriptorHeapType::CbvSrvUav.can_be_shader_visible());
        assert!(DescriptorHeapType::Sampler.can_be_shader_visible());
        assert!(!DescriptorHeapType::Rtv.can_be_shader_visible());
        assert!(!DescriptorHeapType::Dsv.can_be_shader_visible());
    }

    #[test]
    fn test_cpu_access() {
        assert!(HeapType::Upload.is_cpu_writable());
        assert!(!HeapType::Default.is_cpu_writable());
        assert!(HeapType::Readback.is_cpu_readable());
        assert!(!HeapType::Upload.is_cpu_readable());
    }
}
