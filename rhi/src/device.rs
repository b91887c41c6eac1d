//! Graphics device.
//!
//! The [`GraphicsDevice`] is the composition root of the crate. It owns the
//! three submission queues, the CPU-only and shader-visible descriptor
//! allocators, and one persistent direct command list used for one-off
//! uploads.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{AdapterInfo, DummyBackend, GpuBackend, create_backend};
use crate::command::{CommandAllocator, CommandList, CommandQueue, ShaderVisibleHeaps};
use crate::config::DeviceConfig;
use crate::descriptors::{DescriptorAllocator, DescriptorSet};
use crate::error::{GraphicsError, GraphicsResult};
use crate::pipeline::{
    ComputePipelineDescriptor, GraphicsPipelineDescriptor, PipelineState, RootSignature,
    RootSignatureDescriptor,
};
use crate::profiling::profile_function;
use crate::resources::{GraphicsResource, Sampler, align_up};
use crate::types::{
    CommandListType, DescriptorHeapFlags, DescriptorHeapType, Format, HeapType, QueueType,
    ResourceDescriptor, ResourceFlags, ResourceStates, SamplerDescription,
};

/// Row pitch alignment of buffer-to-texture copies.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;

/// How long teardown waits for outstanding GPU work.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// The state a resource must be created in on a heap.
pub fn initial_state_for(heap_type: HeapType) -> ResourceStates {
    match heap_type {
        HeapType::Default => ResourceStates::COMMON,
        HeapType::Upload => ResourceStates::GENERIC_READ,
        HeapType::Readback => ResourceStates::COPY_DEST,
    }
}

/// A graphics device for creating GPU objects and submitting work.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync` and is shared behind an `Arc`. Resource
/// creation takes `self: &Arc<Self>` so resources can hold a weak reference
/// back to the device.
///
/// # Teardown
///
/// Fields are declared in teardown order: the persistent command list, then
/// the descriptor allocators, then the queues, then the backend. Dropping the
/// device first waits for every queue's last signaled value.
///
/// # Example
///
/// ```ignore
/// let device = GraphicsDevice::new(DeviceConfig::default())?;
/// let vertices = device.create_buffer_with_pod(&QUAD, HeapType::Default, Some("quad"))?;
/// let srv = ShaderResourceView::new(&device.create_texture_2d(256, 256, Format::R8G8B8A8Unorm, ResourceFlags::empty(), None)?)?;
/// ```
pub struct GraphicsDevice {
    command_list: Mutex<CommandList>,
    descriptor_allocators: [Arc<DescriptorAllocator>; 4],
    shader_visible: ShaderVisibleHeaps,
    queues: [CommandQueue; 3],
    config: DeviceConfig,
    adapter: AdapterInfo,
    backend: Arc<dyn GpuBackend>,
}

impl GraphicsDevice {
    /// Create a device on the backend selected by `config`.
    pub fn new(config: DeviceConfig) -> GraphicsResult<Arc<Self>> {
        config.validate()?;
        let backend = create_backend(&config)?;
        Self::with_backend(backend, config)
    }

    /// Create a device on an existing backend.
    pub fn with_backend(
        backend: Arc<dyn GpuBackend>,
        config: DeviceConfig,
    ) -> GraphicsResult<Arc<Self>> {
        config.validate()?;
        let adapters = backend.enumerate_adapters();
        let adapter = adapters.get(config.adapter_index).cloned().ok_or_else(|| {
            GraphicsError::InitializationFailed(format!(
                "adapter {} not found ({} available)",
                config.adapter_index,
                adapters.len()
            ))
        })?;
        log::info!(
            "Creating device {} on {} ({} backend{})",
            config.label.as_deref().unwrap_or("(unnamed)"),
            adapter.name,
            backend.name(),
            if adapter.is_software { ", software" } else { "" }
        );

        let queues = [
            CommandQueue::new(backend.clone(), QueueType::Direct)?,
            CommandQueue::new(backend.clone(), QueueType::Compute)?,
            CommandQueue::new(backend.clone(), QueueType::Copy)?,
        ];

        let cpu_allocator = |heap_type| {
            DescriptorAllocator::new(
                backend.clone(),
                heap_type,
                config.descriptors_per_heap,
                DescriptorHeapFlags::empty(),
            )
            .map(Arc::new)
        };
        let descriptor_allocators = [
            cpu_allocator(DescriptorHeapType::CbvSrvUav)?,
            cpu_allocator(DescriptorHeapType::Sampler)?,
            cpu_allocator(DescriptorHeapType::Rtv)?,
            cpu_allocator(DescriptorHeapType::Dsv)?,
        ];

        let shader_visible_allocator = |heap_type| {
            DescriptorAllocator::new(
                backend.clone(),
                heap_type,
                config.descriptors_per_heap,
                DescriptorHeapFlags::SHADER_VISIBLE,
            )
            .map(Arc::new)
        };
        let shader_visible = ShaderVisibleHeaps {
            cbv_srv_uav: shader_visible_allocator(DescriptorHeapType::CbvSrvUav)?,
            sampler: shader_visible_allocator(DescriptorHeapType::Sampler)?,
        };

        let allocator = Arc::new(CommandAllocator::new(
            backend.clone(),
            CommandListType::Direct,
        )?);
        let mut command_list = CommandList::with_parts(
            backend.clone(),
            CommandListType::Direct,
            allocator,
            shader_visible.clone(),
            None,
        )?
        .with_label("device upload list");
        command_list.close()?;

        Ok(Arc::new(Self {
            command_list: Mutex::new(command_list),
            descriptor_allocators,
            shader_visible,
            queues,
            config,
            adapter,
            backend,
        }))
    }

    /// Get the configuration the device was created with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Get the adapter the device runs on.
    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Get the backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// The software backend, if the device runs on it.
    pub fn dummy_backend(&self) -> Option<&DummyBackend> {
        self.backend.as_any().downcast_ref::<DummyBackend>()
    }

    /// Get the queue of a kind.
    pub fn queue(&self, queue_type: QueueType) -> &CommandQueue {
        &self.queues[queue_type.index()]
    }

    /// Get the CPU-only allocator of a heap type.
    pub fn descriptor_allocator(&self, heap_type: DescriptorHeapType) -> &Arc<DescriptorAllocator> {
        &self.descriptor_allocators[heap_type.index()]
    }

    /// Get the shader-visible allocator of a heap type.
    ///
    /// Only CBV/SRV/UAV and sampler heaps can be shader visible.
    pub fn shader_visible_allocator(
        &self,
        heap_type: DescriptorHeapType,
    ) -> GraphicsResult<&Arc<DescriptorAllocator>> {
        self.shader_visible.for_type(heap_type)
    }

    /// The shader-visible allocators, as bound by command lists.
    pub fn shader_visible_heaps(&self) -> ShaderVisibleHeaps {
        self.shader_visible.clone()
    }

    // ---- resources ----

    /// Create a resource on a heap in `initial_state`.
    pub fn create_resource(
        self: &Arc<Self>,
        descriptor: &ResourceDescriptor,
        heap_type: HeapType,
        initial_state: ResourceStates,
    ) -> GraphicsResult<Arc<GraphicsResource>> {
        if descriptor.size_in_bytes() == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "resource {:?} has zero size",
                descriptor.label
            )));
        }
        let id = self
            .backend
            .create_resource(descriptor, heap_type, initial_state)?;
        log::trace!(
            "GraphicsDevice: created resource {}, {} bytes on {:?} heap",
            descriptor.label.as_deref().unwrap_or("(unnamed)"),
            descriptor.size_in_bytes(),
            heap_type
        );
        Ok(Arc::new(GraphicsResource::new(
            self.backend.clone(),
            Arc::downgrade(self),
            id,
            descriptor.clone(),
            heap_type,
            initial_state,
        )))
    }

    /// Create a buffer in the state its heap requires.
    pub fn create_buffer(
        self: &Arc<Self>,
        size: u64,
        heap_type: HeapType,
        label: Option<&str>,
    ) -> GraphicsResult<Arc<GraphicsResource>> {
        let mut descriptor = ResourceDescriptor::buffer(size);
        descriptor.label = label.map(str::to_string);
        self.create_resource(&descriptor, heap_type, initial_state_for(heap_type))
    }

    /// Create a 2D texture on the default heap in the common state.
    pub fn create_texture_2d(
        self: &Arc<Self>,
        width: u32,
        height: u32,
        format: Format,
        flags: ResourceFlags,
        label: Option<&str>,
    ) -> GraphicsResult<Arc<GraphicsResource>> {
        let mut descriptor = ResourceDescriptor::texture_2d(width, height, format).with_flags(flags);
        descriptor.label = label.map(str::to_string);
        self.create_resource(&descriptor, HeapType::Default, ResourceStates::COMMON)
    }

    /// Create a buffer holding `data`.
    ///
    /// Upload-heap buffers are written directly. Default-heap buffers are
    /// staged through an upload buffer and the persistent command list, and
    /// end in [`ResourceStates::GENERIC_READ`]. Blocks until the copy is
    /// done.
    pub fn create_buffer_with_data(
        self: &Arc<Self>,
        data: &[u8],
        heap_type: HeapType,
        label: Option<&str>,
    ) -> GraphicsResult<Arc<GraphicsResource>> {
        profile_function!();
        match heap_type {
            HeapType::Upload => {
                let buffer = self.create_buffer(data.len() as u64, HeapType::Upload, label)?;
                buffer.write_data(0, data)?;
                Ok(buffer)
            }
            HeapType::Default => {
                let staging = self.create_buffer(data.len() as u64, HeapType::Upload, Some("staging"))?;
                staging.write_data(0, data)?;

                let mut descriptor = ResourceDescriptor::buffer(data.len() as u64);
                descriptor.label = label.map(str::to_string);
                let buffer =
                    self.create_resource(&descriptor, HeapType::Default, ResourceStates::COPY_DEST)?;
                self.submit_immediate(|list| {
                    list.copy_resource(&buffer, &staging)?;
                    list.transition(&buffer, ResourceStates::GENERIC_READ)
                })?;
                Ok(buffer)
            }
            HeapType::Readback => Err(GraphicsError::InvalidParameter(
                "readback buffers cannot be created with data".into(),
            )),
        }
    }

    /// Create a buffer holding `values`. See [`create_buffer_with_data`](Self::create_buffer_with_data).
    pub fn create_buffer_with_pod<T: bytemuck::Pod>(
        self: &Arc<Self>,
        values: &[T],
        heap_type: HeapType,
        label: Option<&str>,
    ) -> GraphicsResult<Arc<GraphicsResource>> {
        self.create_buffer_with_data(bytemuck::cast_slice(values), heap_type, label)
    }

    /// Create a 2D texture filled with tightly packed `pixels`.
    ///
    /// The texture ends in [`ResourceStates::PIXEL_SHADER_RESOURCE`]. Blocks
    /// until the copy is done.
    pub fn create_texture_2d_with_data(
        self: &Arc<Self>,
        width: u32,
        height: u32,
        format: Format,
        pixels: &[u8],
        label: Option<&str>,
    ) -> GraphicsResult<Arc<GraphicsResource>> {
        profile_function!();
        let mut descriptor = ResourceDescriptor::texture_2d(width, height, format);
        descriptor.label = label.map(str::to_string);
        let row = descriptor.row_pitch();
        if row == 0 || pixels.len() as u64 != row * u64::from(height) {
            return Err(GraphicsError::InvalidParameter(format!(
                "expected {} bytes of {format:?} pixels for {width}x{height}, got {}",
                row * u64::from(height),
                pixels.len()
            )));
        }

        let pitch = align_up(row, TEXTURE_DATA_PITCH_ALIGNMENT);
        let staging = self.create_buffer(pitch * u64::from(height), HeapType::Upload, Some("texture staging"))?;
        for (y, texels) in pixels.chunks_exact(row as usize).enumerate() {
            staging.write_data(y as u64 * pitch, texels)?;
        }

        let texture = self.create_resource(&descriptor, HeapType::Default, ResourceStates::COPY_DEST)?;
        self.submit_immediate(|list| {
            list.copy_texture_region(&texture, &staging, 0, pitch)?;
            list.transition(&texture, ResourceStates::PIXEL_SHADER_RESOURCE)
        })?;
        Ok(texture)
    }

    /// Copy a buffer's contents back to the CPU.
    ///
    /// Default-heap buffers are copied through a readback buffer; their
    /// tracked state is restored afterwards. Blocks until the copy is done.
    pub fn read_back(self: &Arc<Self>, resource: &GraphicsResource) -> GraphicsResult<Vec<u8>> {
        if !resource.is_buffer() {
            return Err(GraphicsError::InvalidParameter(
                "only buffers can be read back".into(),
            ));
        }
        if resource.heap_type() == HeapType::Readback {
            return resource.read_to_vec();
        }

        let size = resource.size_in_bytes();
        let readback = self.create_buffer(size, HeapType::Readback, Some("readback"))?;
        let restore = resource.current_state();
        self.submit_immediate(|list| {
            if resource.heap_type() == HeapType::Default {
                list.transition(resource, ResourceStates::COPY_SOURCE)?;
            }
            list.copy_buffer_region(&readback, 0, resource, 0, size)?;
            if resource.heap_type() == HeapType::Default {
                list.transition(resource, restore)?;
            }
            Ok(())
        })?;
        readback.read_to_vec()
    }

    /// Record into the persistent direct list, submit it and wait.
    fn submit_immediate(
        &self,
        record: impl FnOnce(&mut CommandList) -> GraphicsResult<()>,
    ) -> GraphicsResult<()> {
        let mut list = self.command_list.lock();
        list.reset()?;
        let recorded = record(&mut list);
        let compiled = list.close()?;
        recorded?;
        self.queue(QueueType::Direct)
            .execute_command_lists(&[&compiled])?;
        Ok(())
    }

    // ---- descriptors ----

    /// Create a sampler in the CPU sampler heap.
    pub fn create_sampler(&self, description: SamplerDescription) -> GraphicsResult<Sampler> {
        Sampler::new(
            self.descriptor_allocator(DescriptorHeapType::Sampler),
            description,
        )
    }

    /// Reserve a descriptor set of `count` slots.
    pub fn create_descriptor_set(
        &self,
        heap_type: DescriptorHeapType,
        count: u32,
    ) -> GraphicsResult<DescriptorSet> {
        DescriptorSet::new(self, heap_type, count)
    }

    // ---- commands ----

    /// Create a command allocator.
    pub fn create_command_allocator(
        &self,
        list_type: CommandListType,
    ) -> GraphicsResult<Arc<CommandAllocator>> {
        CommandAllocator::new(self.backend.clone(), list_type).map(Arc::new)
    }

    /// Create a recording command list.
    pub fn create_command_list(
        &self,
        list_type: CommandListType,
        allocator: Arc<CommandAllocator>,
        pipeline: Option<&PipelineState>,
    ) -> GraphicsResult<CommandList> {
        CommandList::new(self, list_type, allocator, pipeline)
    }

    // ---- pipelines ----

    /// Create a root signature.
    pub fn create_root_signature(
        &self,
        descriptor: RootSignatureDescriptor,
    ) -> GraphicsResult<Arc<RootSignature>> {
        RootSignature::new(self.backend.clone(), descriptor).map(Arc::new)
    }

    /// Create a graphics pipeline.
    pub fn create_graphics_pipeline(
        &self,
        root_signature: &Arc<RootSignature>,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> GraphicsResult<Arc<PipelineState>> {
        PipelineState::new_graphics(self.backend.clone(), root_signature.clone(), descriptor)
            .map(Arc::new)
    }

    /// Create a compute pipeline.
    pub fn create_compute_pipeline(
        &self,
        root_signature: &Arc<RootSignature>,
        descriptor: &ComputePipelineDescriptor,
    ) -> GraphicsResult<Arc<PipelineState>> {
        PipelineState::new_compute(self.backend.clone(), root_signature.clone(), descriptor)
            .map(Arc::new)
    }

    // ---- synchronization ----

    /// Block until every queue finished all submitted work.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        profile_function!();
        for queue in &self.queues {
            queue.flush()?;
        }
        Ok(())
    }

    /// Wait until every queue reached its last signaled value, giving up
    /// after `timeout` per queue.
    ///
    /// Returns `true` if all queues caught up.
    pub fn wait_signaled_timeout(&self, timeout: Duration) -> GraphicsResult<bool> {
        let mut idle = true;
        for queue in &self.queues {
            let last = queue.last_signaled_value();
            if last > 0 {
                idle &= queue.wait_for_signal_timeout(last, timeout)?;
            }
        }
        Ok(idle)
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        log::debug!(
            "Destroying device {}",
            self.config.label.as_deref().unwrap_or("(unnamed)")
        );
        match self.wait_signaled_timeout(TEARDOWN_TIMEOUT) {
            Ok(true) => {}
            Ok(false) => log::warn!("Device destroyed while GPU work is still pending"),
            Err(e) => log::error!("Failed to wait for GPU before teardown: {e}"),
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("label", &self.config.label)
            .field("adapter", &self.adapter.name)
            .field("backend", &self.backend.name())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(DeviceConfig::default().with_label("test")).unwrap()
    }

    #[test]
    fn test_device_creation() {
        let device = device();
        assert_eq!(device.backend().name(), "Dummy");
        assert!(device.dummy_backend().is_some());
        assert!(device.adapter_info().is_software);
        for queue_type in QueueType::ALL {
            assert_eq!(device.queue(queue_type).queue_type(), queue_type);
        }
        for heap_type in DescriptorHeapType::ALL {
            let allocator = device.descriptor_allocator(heap_type);
            assert_eq!(allocator.heap_type(), heap_type);
            assert!(!allocator.is_shader_visible());
        }
        assert!(
            device
                .shader_visible_allocator(DescriptorHeapType::CbvSrvUav)
                .unwrap()
                .is_shader_visible()
        );
        assert!(device.shader_visible_allocator(DescriptorHeapType::Rtv).is_err());
    }

    #[test]
    fn test_missing_adapter() {
        let err = GraphicsDevice::new(DeviceConfig::default().with_adapter_index(7)).unwrap_err();
        assert!(matches!(err, GraphicsError::InitializationFailed(_)));
    }

    #[test]
    fn test_buffer_upload_round_trip() {
        let device = device();
        let values: Vec<u32> = (0..64).collect();
        let buffer = device
            .create_buffer_with_pod(&values, HeapType::Default, Some("data"))
            .unwrap();
        assert_eq!(buffer.current_state(), ResourceStates::GENERIC_READ);
        let bytes = device.read_back(&buffer).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&bytes), values.as_slice());
        assert_eq!(buffer.current_state(), ResourceStates::GENERIC_READ);
    }

    #[test]
    fn test_texture_upload_pads_rows() {
        let device = device();
        let pixels: Vec<u8> = (0..3 * 2 * 4).map(|i| i as u8).collect();
        let texture = device
            .create_texture_2d_with_data(3, 2, Format::R8G8B8A8Unorm, &pixels, Some("tex"))
            .unwrap();
        assert_eq!(texture.current_state(), ResourceStates::PIXEL_SHADER_RESOURCE);
        let stored = device
            .dummy_backend()
            .unwrap()
            .resource_bytes(texture.native_id())
            .unwrap();
        assert_eq!(stored, pixels);
    }

    #[test]
    fn test_texture_data_size_mismatch() {
        let device = device();
        assert!(matches!(
            device.create_texture_2d_with_data(4, 4, Format::R8G8B8A8Unorm, &[0; 3], None),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_wait_idle() {
        let device = device();
        device.wait_idle().unwrap();
        for queue_type in QueueType::ALL {
            let queue = device.queue(queue_type);
            assert_eq!(queue.completed_value().unwrap(), queue.last_signaled_value());
        }
    }
}
