//! Native driver abstraction layer.
//!
//! Every native object (heap, resource, queue, fence, command list, ...) is
//! reached through the [`GpuBackend`] trait and named by an opaque id. The
//! wrapper types in this crate own exactly one id each and release it on drop.
//!
//! # Available Backends
//!
//! - `dummy` (default): software GPU with real byte storage and a controllable
//!   timeline, used for development and tests
//!
//! # Recording
//!
//! Commands are recorded through a single [`GpuBackend::record`] entry point
//! taking a [`Command`]. Backends validate what a native validation layer
//! would and return [`GraphicsError::Validation`](crate::GraphicsError::Validation).

mod command;
pub mod dummy;

use std::sync::Arc;
use std::time::Duration;

pub use command::{Command, ResourceBarrier};
pub use dummy::{DummyBackend, DummyStats, GpuTimeline};

use crate::config::DeviceConfig;
use crate::descriptors::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::error::{GraphicsResult, PresentError};
use crate::pipeline::{ComputePipelineDescriptor, GraphicsPipelineDescriptor, RootSignatureDescriptor};
use crate::types::{
    CommandListType, DescriptorHeapDescriptor, DescriptorHeapType, Format, HeapType, QueueType,
    ResourceDescriptor, ResourceStates, ViewDescription,
};

macro_rules! native_ids {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u64);

            impl $name {
                /// Raw id value, unique per backend across all object kinds.
                pub fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

native_ids! {
    /// Handle to a native buffer or texture allocation.
    ResourceId;
    /// Handle to a native descriptor heap.
    HeapId;
    /// Handle to a native fence.
    FenceId;
    /// Handle to a native submission queue.
    QueueId;
    /// Handle to a native command allocator.
    AllocatorId;
    /// Handle to a native command list.
    ListId;
    /// Handle to a native root signature.
    RootSignatureId;
    /// Handle to a native pipeline state object.
    PipelineId;
    /// Handle to a native swap chain.
    SwapChainId;
}

/// Description of a physical adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Human readable adapter name.
    pub name: String,
    /// PCI vendor id.
    pub vendor_id: u32,
    /// PCI device id.
    pub device_id: u32,
    /// Dedicated video memory in bytes.
    pub dedicated_video_memory: u64,
    /// Whether the adapter is a software rasterizer.
    pub is_software: bool,
}

/// Contents of one descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorRecord {
    /// Resource the view points at. `None` for samplers and null descriptors.
    pub resource: Option<ResourceId>,
    /// The view written into the slot.
    pub view: ViewDescription,
}

/// Native swap chain creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: u32,
}

/// GPU backend trait for abstracting the native explicit graphics API.
///
/// All methods take `&self`; backends synchronize internally.
pub trait GpuBackend: Send + Sync + std::fmt::Debug + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Access the concrete backend, e.g. to drive the dummy GPU in tests.
    fn as_any(&self) -> &dyn std::any::Any;

    /// List the adapters this backend can drive.
    fn enumerate_adapters(&self) -> Vec<AdapterInfo>;

    /// Byte stride between consecutive descriptors of a heap type.
    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32;

    // ---- descriptor heaps ----

    /// Create a descriptor heap.
    fn create_descriptor_heap(&self, descriptor: &DescriptorHeapDescriptor)
    -> GraphicsResult<HeapId>;

    /// Destroy a descriptor heap.
    fn destroy_descriptor_heap(&self, heap: HeapId);

    /// CPU handle of the first slot of a heap.
    fn heap_cpu_start(&self, heap: HeapId) -> GraphicsResult<CpuDescriptorHandle>;

    /// GPU handle of the first slot of a shader-visible heap.
    fn heap_gpu_start(&self, heap: HeapId) -> GraphicsResult<GpuDescriptorHandle>;

    /// Write a view into the slot at `dest`.
    fn create_view(
        &self,
        resource: Option<ResourceId>,
        view: &ViewDescription,
        dest: CpuDescriptorHandle,
    ) -> GraphicsResult<()>;

    /// Copy descriptors into consecutive slots starting at `dest`.
    fn copy_descriptors(
        &self,
        dest: CpuDescriptorHandle,
        sources: &[CpuDescriptorHandle],
        heap_type: DescriptorHeapType,
    ) -> GraphicsResult<()>;

    // ---- resources ----

    /// Allocate a committed resource.
    fn create_resource(
        &self,
        descriptor: &ResourceDescriptor,
        heap_type: HeapType,
        initial_state: ResourceStates,
    ) -> GraphicsResult<ResourceId>;

    /// Release one reference to a resource.
    fn destroy_resource(&self, resource: ResourceId);

    /// GPU virtual address of a buffer.
    fn gpu_virtual_address(&self, resource: ResourceId) -> GraphicsResult<u64>;

    /// Write through the persistent mapping of an upload-heap resource.
    fn write_resource(&self, resource: ResourceId, offset: u64, data: &[u8]) -> GraphicsResult<()>;

    /// Read through the mapping of a readback-heap resource.
    fn read_resource(&self, resource: ResourceId, offset: u64, out: &mut [u8])
    -> GraphicsResult<()>;

    // ---- pipelines ----

    /// Create a root signature.
    fn create_root_signature(
        &self,
        descriptor: &RootSignatureDescriptor,
    ) -> GraphicsResult<RootSignatureId>;

    /// Destroy a root signature.
    fn destroy_root_signature(&self, root_signature: RootSignatureId);

    /// Create a graphics pipeline state object.
    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
        root_signature: RootSignatureId,
    ) -> GraphicsResult<PipelineId>;

    /// Create a compute pipeline state object.
    fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
        root_signature: RootSignatureId,
    ) -> GraphicsResult<PipelineId>;

    /// Destroy a pipeline state object.
    fn destroy_pipeline(&self, pipeline: PipelineId);

    // ---- command recording ----

    /// Create a command allocator.
    fn create_command_allocator(&self, list_type: CommandListType) -> GraphicsResult<AllocatorId>;

    /// Reclaim the memory of a command allocator.
    ///
    /// Fails if any list recorded against it is still queued on the GPU.
    fn reset_command_allocator(&self, allocator: AllocatorId) -> GraphicsResult<()>;

    /// Destroy a command allocator.
    fn destroy_command_allocator(&self, allocator: AllocatorId);

    /// Create a command list in the recording state.
    fn create_command_list(
        &self,
        list_type: CommandListType,
        allocator: AllocatorId,
        initial_pipeline: Option<PipelineId>,
    ) -> GraphicsResult<ListId>;

    /// Reopen a closed command list against an allocator.
    fn reset_command_list(
        &self,
        list: ListId,
        allocator: AllocatorId,
        initial_pipeline: Option<PipelineId>,
    ) -> GraphicsResult<()>;

    /// Finish recording.
    fn close_command_list(&self, list: ListId) -> GraphicsResult<()>;

    /// Record one command.
    fn record(&self, list: ListId, command: Command) -> GraphicsResult<()>;

    /// Destroy a command list.
    fn destroy_command_list(&self, list: ListId);

    // ---- queues and fences ----

    /// Create a submission queue.
    fn create_queue(&self, queue_type: QueueType) -> GraphicsResult<QueueId>;

    /// Destroy a submission queue.
    fn destroy_queue(&self, queue: QueueId);

    /// Submit closed command lists in order.
    fn execute_command_lists(&self, queue: QueueId, lists: &[ListId]) -> GraphicsResult<()>;

    /// Enqueue a GPU-side fence write after all prior work on the queue.
    fn signal(&self, queue: QueueId, fence: FenceId, value: u64) -> GraphicsResult<()>;

    /// Make the queue wait on the GPU until `fence` reaches `value`.
    fn queue_wait(&self, queue: QueueId, fence: FenceId, value: u64) -> GraphicsResult<()>;

    /// Create a fence holding `initial_value`.
    fn create_fence(&self, initial_value: u64) -> GraphicsResult<FenceId>;

    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceId);

    /// Last value the GPU wrote to the fence.
    fn fence_completed_value(&self, fence: FenceId) -> GraphicsResult<u64>;

    /// Block the calling thread until the fence reaches `value`.
    fn wait_for_fence(&self, fence: FenceId, value: u64) -> GraphicsResult<()>;

    /// Block until the fence reaches `value` or the timeout elapses.
    ///
    /// Returns `true` if the value was reached.
    fn wait_for_fence_timeout(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> GraphicsResult<bool>;

    // ---- presentation ----

    /// Create a swap chain presenting from `queue`.
    fn create_swap_chain(
        &self,
        queue: QueueId,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<SwapChainId>;

    /// Destroy a swap chain and its back buffers.
    fn destroy_swap_chain(&self, swap_chain: SwapChainId);

    /// Acquire a reference to back buffer `index`.
    ///
    /// The returned resource must be released with [`GpuBackend::destroy_resource`].
    fn swap_chain_buffer(&self, swap_chain: SwapChainId, index: u32) -> GraphicsResult<ResourceId>;

    /// Index of the back buffer that will be presented next.
    fn current_back_buffer_index(&self, swap_chain: SwapChainId) -> GraphicsResult<u32>;

    /// Present the current back buffer.
    fn present(&self, swap_chain: SwapChainId, sync_interval: u32) -> Result<(), PresentError>;

    /// Recreate the back buffers with a new size.
    ///
    /// Fails while any back buffer reference is still held.
    fn resize_swap_chain(&self, swap_chain: SwapChainId, width: u32, height: u32)
    -> GraphicsResult<()>;
}

/// Selects and creates the backend for a device configuration.
pub fn create_backend(config: &DeviceConfig) -> GraphicsResult<Arc<dyn GpuBackend>> {
    log::info!("Using dummy backend");
    Ok(Arc::new(
        DummyBackend::new()
            .with_timeline(config.timeline)
            .with_validation(config.validation),
    ))
}
