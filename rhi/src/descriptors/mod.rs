//! Descriptor heaps, handles and descriptor sets.

mod allocator;
mod handle;
mod set;

pub use allocator::{DESCRIPTORS_PER_HEAP, DescriptorAllocator};
pub use handle::{CpuDescriptorHandle, GpuDescriptorHandle};
pub use set::DescriptorSet;
