//! Contiguous descriptor ranges bound as one table.

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{GraphicsResource, ResourceView, Sampler};
use crate::types::DescriptorHeapType;

use super::{CpuDescriptorHandle, DescriptorAllocator};

/// A contiguous range of descriptor slots claimed in one allocator call.
///
/// Views and samplers are copied into the range in insertion order, so the
/// `i`-th added descriptor lives at [`handle_at(i)`](Self::handle_at). The
/// set keeps the viewed resources alive for as long as it exists.
///
/// The range is subject to the allocator's wraparound like any other
/// allocation.
pub struct DescriptorSet {
    allocator: Arc<DescriptorAllocator>,
    start: CpuDescriptorHandle,
    capacity: u32,
    len: u32,
    resources: Vec<Arc<GraphicsResource>>,
}

impl DescriptorSet {
    /// Reserve `count` slots in the device's CPU allocator for `heap_type`.
    pub fn new(
        device: &GraphicsDevice,
        heap_type: DescriptorHeapType,
        count: u32,
    ) -> GraphicsResult<Self> {
        Self::from_allocator(device.descriptor_allocator(heap_type).clone(), count)
    }

    /// Reserve one slot per sampler in the device's sampler allocator and
    /// copy the samplers in.
    pub fn new_with_samplers(device: &GraphicsDevice, samplers: &[&Sampler]) -> GraphicsResult<Self> {
        let count = u32::try_from(samplers.len())
            .map_err(|_| GraphicsError::InvalidParameter("too many samplers".into()))?;
        let mut set = Self::new(device, DescriptorHeapType::Sampler, count)?;
        set.add_samplers(samplers)?;
        Ok(set)
    }

    /// Reserve `count` slots in `allocator`.
    pub fn from_allocator(allocator: Arc<DescriptorAllocator>, count: u32) -> GraphicsResult<Self> {
        let start = allocator.allocate(count)?;
        log::trace!(
            "Descriptor set of {count} {:?} slots at {:#x}",
            allocator.heap_type(),
            start.ptr
        );
        Ok(Self {
            allocator,
            start,
            capacity: count,
            len: 0,
            resources: Vec::new(),
        })
    }

    /// Copy views into the next free slots.
    ///
    /// Fails without copying anything if the set would overflow or a view
    /// belongs to another heap type.
    pub fn add_resource_views<V: AsRef<ResourceView>>(&mut self, views: &[V]) -> GraphicsResult<()> {
        let heap_type = self.heap_type();
        if let Some(view) = views.iter().map(AsRef::as_ref).find(|v| v.heap_type() != heap_type) {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} view cannot be added to a {heap_type:?} descriptor set",
                view.heap_type()
            )));
        }
        let sources: Vec<_> = views.iter().map(|v| v.as_ref().cpu_handle()).collect();
        self.copy_in(&sources)?;
        self.resources
            .extend(views.iter().map(|v| v.as_ref().resource().clone()));
        Ok(())
    }

    /// Copy samplers into the next free slots.
    pub fn add_samplers(&mut self, samplers: &[&Sampler]) -> GraphicsResult<()> {
        if self.heap_type() != DescriptorHeapType::Sampler {
            return Err(GraphicsError::InvalidParameter(format!(
                "samplers cannot be added to a {:?} descriptor set",
                self.heap_type()
            )));
        }
        let sources: Vec<_> = samplers.iter().map(|s| s.cpu_handle()).collect();
        self.copy_in(&sources)
    }

    fn copy_in(&mut self, sources: &[CpuDescriptorHandle]) -> GraphicsResult<()> {
        let requested = self.len as usize + sources.len();
        if requested > self.capacity as usize {
            return Err(GraphicsError::DescriptorSetFull {
                capacity: self.capacity,
                requested: u32::try_from(requested).unwrap_or(u32::MAX),
            });
        }
        if sources.is_empty() {
            return Ok(());
        }
        let dest = self
            .start
            .offset(self.len, self.allocator.descriptor_increment_size());
        self.allocator
            .backend()
            .copy_descriptors(dest, sources, self.heap_type())?;
        self.len = requested as u32;
        Ok(())
    }

    /// Handle of the first slot.
    pub fn start_handle(&self) -> CpuDescriptorHandle {
        self.start
    }

    /// Handle of the `index`-th filled slot.
    pub fn handle_at(&self, index: u32) -> Option<CpuDescriptorHandle> {
        (index < self.len).then(|| {
            self.start
                .offset(index, self.allocator.descriptor_increment_size())
        })
    }

    /// Handles of all filled slots, in insertion order.
    pub fn handles(&self) -> Vec<CpuDescriptorHandle> {
        (0..self.len).filter_map(|i| self.handle_at(i)).collect()
    }

    /// Number of descriptors added so far.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots reserved.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.allocator.heap_type()
    }

    /// Resources referenced by the added views.
    pub fn resources(&self) -> &[Arc<GraphicsResource>] {
        &self.resources
    }
}

impl std::fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("heap_type", &self.heap_type())
            .field("start", &format_args!("{:#x}", self.start.ptr))
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

static_assertions::assert_impl_all!(DescriptorSet: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::resources::{ConstantBufferView, ShaderResourceView};
    use crate::types::{HeapType, SamplerDescription};

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(DeviceConfig::default()).unwrap()
    }

    #[test]
    fn test_views_land_in_insertion_order() {
        let device = device();
        let a = device.create_buffer(256, HeapType::Upload, Some("a")).unwrap();
        let b = device.create_buffer(512, HeapType::Upload, Some("b")).unwrap();
        let va = ConstantBufferView::new(&a).unwrap();
        let vb = ConstantBufferView::new(&b).unwrap();

        let mut set = DescriptorSet::new(&device, DescriptorHeapType::CbvSrvUav, 2).unwrap();
        set.add_resource_views(&[vb.clone(), va.clone()]).unwrap();

        assert_eq!(set.len(), 2);
        let inc = device
            .descriptor_allocator(DescriptorHeapType::CbvSrvUav)
            .descriptor_increment_size();
        assert_eq!(set.handle_at(1), Some(set.start_handle().offset(1, inc)));
        assert_eq!(set.handle_at(2), None);

        let backend = device.dummy_backend().unwrap();
        let first = backend.descriptor_at(set.start_handle()).unwrap();
        assert_eq!(first.resource, Some(b.native_id()));
        let second = backend.descriptor_at(set.handle_at(1).unwrap()).unwrap();
        assert_eq!(second.resource, Some(a.native_id()));
        assert_eq!(set.resources().len(), 2);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let device = device();
        let buffer = device.create_buffer(256, HeapType::Upload, None).unwrap();
        let view = ConstantBufferView::new(&buffer).unwrap();

        let mut set = DescriptorSet::new(&device, DescriptorHeapType::CbvSrvUav, 1).unwrap();
        set.add_resource_views(&[view.clone()]).unwrap();
        assert_eq!(
            set.add_resource_views(&[view]),
            Err(GraphicsError::DescriptorSetFull {
                capacity: 1,
                requested: 2
            })
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_mixed_heap_types_rejected() {
        let device = device();
        let buffer = device.create_buffer(1024, HeapType::Default, None).unwrap();
        let srv = ShaderResourceView::new(&buffer).unwrap();
        let mut set = DescriptorSet::new(&device, DescriptorHeapType::Sampler, 1).unwrap();
        assert!(matches!(
            set.add_resource_views(&[srv]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_sampler_set() {
        let device = device();
        let linear = device.create_sampler(SamplerDescription::linear()).unwrap();
        let point = device.create_sampler(SamplerDescription::point()).unwrap();
        let set = DescriptorSet::new_with_samplers(&device, &[&linear, &point]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.heap_type(), DescriptorHeapType::Sampler);
    }
}
