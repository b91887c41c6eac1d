//! CPU and GPU descriptor handles.

/// Address of a descriptor slot as seen by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CpuDescriptorHandle {
    pub ptr: u64,
}

impl CpuDescriptorHandle {
    /// Handle `count` slots after this one.
    pub fn offset(self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + u64::from(count) * u64::from(increment_size),
        }
    }
}

/// Address of a descriptor slot as seen by shaders.
///
/// Only shader-visible heaps have GPU handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    /// Handle `count` slots after this one.
    pub fn offset(self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + u64::from(count) * u64::from(increment_size),
        }
    }
}
