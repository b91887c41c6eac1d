//! Samplers living in the sampler descriptor heap.

use std::sync::Arc;

use crate::descriptors::{CpuDescriptorHandle, DescriptorAllocator};
use crate::error::GraphicsResult;
use crate::types::{SamplerDescription, ViewDescription};

/// A sampler descriptor written into a CPU sampler heap slot.
#[derive(Clone)]
pub struct Sampler {
    allocator: Arc<DescriptorAllocator>,
    handle: CpuDescriptorHandle,
    description: SamplerDescription,
}

impl Sampler {
    /// Write `description` into a fresh slot of a sampler allocator.
    pub fn new(
        allocator: &Arc<DescriptorAllocator>,
        description: SamplerDescription,
    ) -> GraphicsResult<Self> {
        let handle = allocator.allocate(1)?;
        allocator
            .backend()
            .create_view(None, &ViewDescription::Sampler(description), handle)?;
        log::trace!("Created sampler {:?} at {:#x}", description.filter, handle.ptr);
        Ok(Self {
            allocator: allocator.clone(),
            handle,
            description,
        })
    }

    /// CPU handle of the descriptor slot.
    pub fn cpu_handle(&self) -> CpuDescriptorHandle {
        self.handle
    }

    /// The sampler description.
    pub fn description(&self) -> &SamplerDescription {
        &self.description
    }

    /// Allocator the slot was taken from.
    pub fn allocator(&self) -> &Arc<DescriptorAllocator> {
        &self.allocator
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &format_args!("{:#x}", self.handle.ptr))
            .field("description", &self.description)
            .finish()
    }
}
