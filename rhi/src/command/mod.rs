//! Command allocators, lists and queues.

mod allocator;
mod list;
mod queue;

pub use allocator::CommandAllocator;
pub use list::{CommandList, CompiledCommandList, ShaderVisibleHeaps};
pub use queue::CommandQueue;
