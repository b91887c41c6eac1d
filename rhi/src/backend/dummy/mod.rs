//! Dummy GPU backend for testing and development.
//!
//! This backend is a small software GPU. It doesn't rasterize, but it keeps
//! real byte storage for resources, really copies and clears them, keeps
//! descriptor heaps as tables, and runs each queue's operations in order on a
//! timeline the caller controls. That is enough to observe uploads and
//! readbacks, fence ordering, and allocator reuse hazards without hardware.

mod state;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::descriptors::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::error::{GraphicsError, GraphicsResult, PresentError};
use crate::pipeline::{
    ComputePipelineDescriptor, GraphicsPipelineDescriptor, PipelineKind, RootSignatureDescriptor,
};
use crate::types::{
    CommandListType, DescriptorHeapDescriptor, DescriptorHeapType, HeapType, QueueType,
    ResourceDescriptor, ResourceFlags, ResourceStates, ViewDescription,
};

use super::{
    AdapterInfo, AllocatorId, Command, DescriptorRecord, FenceId, GpuBackend, HeapId, ListId,
    PipelineId, QueueId, ResourceId, RootSignatureId, SwapChainDescriptor, SwapChainId,
};
use state::{
    AllocatorState, CPU_DESCRIPTOR_BASE, DummyFence, DummyState, GPU_DESCRIPTOR_BASE,
    HEAP_WINDOW_SHIFT, HeapState, ListState, QueueOp, QueueState, RESOURCE_WINDOW_SHIFT,
    ResourceState, Step, SubmittedList, SwapChainState, validation,
};

/// When queued GPU work runs on the software GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GpuTimeline {
    /// Work runs as soon as it is submitted.
    #[default]
    Immediate,
    /// Work runs only when [`DummyBackend::step_queue`],
    /// [`DummyBackend::complete_up_to`] or [`DummyBackend::flush`] is called.
    Deferred,
}

/// Counters of work the software GPU has executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DummyStats {
    pub lists_executed: u64,
    pub bundles_executed: u64,
    pub draw_calls: u64,
    pub dispatches: u64,
    pub copies: u64,
    pub clears: u64,
    pub barriers: u64,
    pub presents: u64,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    state: Mutex<DummyState>,
    next_id: AtomicU64,
    validation: bool,
}

impl DummyBackend {
    /// Create a new dummy backend with an immediate timeline and validation on.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState::default()),
            next_id: AtomicU64::new(1),
            validation: true,
        }
    }

    /// Set the initial timeline.
    pub fn with_timeline(mut self, timeline: GpuTimeline) -> Self {
        self.state.get_mut().timeline = timeline;
        self
    }

    /// Enable or disable the validation checks done while recording.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Get the current timeline.
    pub fn timeline(&self) -> GpuTimeline {
        self.state.lock().timeline
    }

    /// Switch timelines. Switching to immediate runs all runnable work.
    pub fn set_timeline(&self, timeline: GpuTimeline) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.timeline = timeline;
        log::debug!("DummyBackend: timeline set to {timeline:?}");
        if timeline == GpuTimeline::Immediate {
            state.drain()?;
        }
        Ok(())
    }

    /// Run the next operation of one queue.
    ///
    /// Returns `false` if the queue is empty or blocked on a GPU-side wait.
    pub fn step_queue(&self, queue: QueueId) -> GraphicsResult<bool> {
        Ok(self.state.lock().step_queue(queue)? != Step::Idle)
    }

    /// Run one queue until it signals a fence value of at least `value`.
    ///
    /// Stops early if the queue runs dry or blocks.
    pub fn complete_up_to(&self, queue: QueueId, value: u64) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        loop {
            match state.step_queue(queue)? {
                Step::Idle => return Ok(()),
                Step::Signaled(signaled) if signaled >= value => return Ok(()),
                _ => {}
            }
        }
    }

    /// Run every queue until nothing can make progress.
    pub fn flush(&self) -> GraphicsResult<()> {
        self.state.lock().drain()
    }

    /// Number of operations queued and not yet executed.
    pub fn pending_operation_count(&self) -> usize {
        self.state.lock().pending_operations()
    }

    /// Execution counters.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    /// Contents of a descriptor slot, if it was written.
    pub fn descriptor_at(&self, handle: CpuDescriptorHandle) -> Option<DescriptorRecord> {
        self.state.lock().record_at(handle).ok()
    }

    /// Copy of a resource's backing memory, ignoring heap access rules.
    pub fn resource_bytes(&self, resource: ResourceId) -> Option<Vec<u8>> {
        self.state
            .lock()
            .resources
            .get(&resource)
            .map(|r| r.data.clone())
    }

    /// Number of live resources.
    pub fn live_resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Number of live descriptor heaps.
    pub fn live_heap_count(&self) -> usize {
        self.state.lock().heaps.len()
    }

    /// Number of live command lists.
    pub fn live_command_list_count(&self) -> usize {
        self.state.lock().lists.len()
    }

    /// Number of live command allocators.
    pub fn live_allocator_count(&self) -> usize {
        self.state.lock().allocators.len()
    }

    /// Make every following present fail as if the adapter was removed.
    pub fn simulate_device_removed(&self) {
        log::warn!("DummyBackend: simulating device removal");
        self.state.lock().device_removed = true;
    }

    /// Make the next present fail with `error`.
    pub fn inject_present_error(&self, error: PresentError) {
        self.state.lock().injected_present_error = Some(error);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn create_resource_locked(
        &self,
        state: &mut DummyState,
        descriptor: &ResourceDescriptor,
        heap_type: HeapType,
        initial_state: ResourceStates,
    ) -> GraphicsResult<ResourceId> {
        if self.validation {
            if let Some(required) = state::required_initial_state(heap_type)
                && initial_state != required
            {
                return Err(validation(format!(
                    "{heap_type:?} heap resources must start in {required:?}, got {initial_state:?}"
                )));
            }
            if heap_type != HeapType::Default && !descriptor.is_buffer() {
                return Err(validation("only buffers can live in upload or readback heaps"));
            }
            if descriptor
                .flags
                .intersects(ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_DEPTH_STENCIL)
                && descriptor.is_buffer()
            {
                return Err(validation("buffers cannot be render or depth targets"));
            }
        }
        let data = state::allocate_storage(descriptor)?;
        let id = ResourceId(self.next_id());
        state.resources.insert(
            id,
            ResourceState {
                descriptor: descriptor.clone(),
                heap_type,
                data,
                refs: 1,
            },
        );
        Ok(id)
    }

    fn pump(&self, state: &mut DummyState) -> GraphicsResult<()> {
        if state.timeline == GpuTimeline::Immediate {
            state.drain()?;
        }
        Ok(())
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DummyBackend")
            .field("timeline", &state.timeline)
            .field("validation", &self.validation)
            .field("resources", &state.resources.len())
            .field("pending_operations", &state.pending_operations())
            .finish()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        vec![AdapterInfo {
            name: "Software Adapter".to_string(),
            vendor_id: 0x1414,
            device_id: 0x008c,
            dedicated_video_memory: 0,
            is_software: true,
        }]
    }

    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        state::increment_size(heap_type)
    }

    fn create_descriptor_heap(
        &self,
        descriptor: &DescriptorHeapDescriptor,
    ) -> GraphicsResult<HeapId> {
        if descriptor.is_shader_visible() && !descriptor.heap_type.can_be_shader_visible() {
            return Err(validation(format!(
                "{:?} heaps cannot be shader visible",
                descriptor.heap_type
            )));
        }
        let span = u64::from(descriptor.count) * u64::from(state::increment_size(descriptor.heap_type));
        if descriptor.count == 0 || span > 1 << HEAP_WINDOW_SHIFT {
            return Err(validation(format!(
                "invalid descriptor heap size {}",
                descriptor.count
            )));
        }
        let id = HeapId(self.next_id());
        log::trace!(
            "DummyBackend: creating descriptor heap {} ({:?} x {})",
            descriptor.label.as_deref().unwrap_or("(unnamed)"),
            descriptor.heap_type,
            descriptor.count
        );
        self.state.lock().heaps.insert(
            id,
            HeapState {
                heap_type: descriptor.heap_type,
                shader_visible: descriptor.is_shader_visible(),
                slots: vec![None; descriptor.count as usize],
            },
        );
        Ok(id)
    }

    fn destroy_descriptor_heap(&self, heap: HeapId) {
        self.state.lock().heaps.remove(&heap);
    }

    fn heap_cpu_start(&self, heap: HeapId) -> GraphicsResult<CpuDescriptorHandle> {
        if !self.state.lock().heaps.contains_key(&heap) {
            return Err(validation(format!("unknown heap {heap:?}")));
        }
        Ok(CpuDescriptorHandle {
            ptr: CPU_DESCRIPTOR_BASE + (heap.0 << HEAP_WINDOW_SHIFT),
        })
    }

    fn heap_gpu_start(&self, heap: HeapId) -> GraphicsResult<GpuDescriptorHandle> {
        let state = self.state.lock();
        let heap_state = state
            .heaps
            .get(&heap)
            .ok_or_else(|| validation(format!("unknown heap {heap:?}")))?;
        if !heap_state.shader_visible {
            return Err(GraphicsError::InvalidParameter(
                "GPU handles exist only for shader-visible heaps".into(),
            ));
        }
        Ok(GpuDescriptorHandle {
            ptr: GPU_DESCRIPTOR_BASE + (heap.0 << HEAP_WINDOW_SHIFT),
        })
    }

    fn create_view(
        &self,
        resource: Option<ResourceId>,
        view: &ViewDescription,
        dest: CpuDescriptorHandle,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let (heap, slot) = state.locate_cpu(dest)?;
        if state.heaps[&heap].heap_type != view.heap_type() {
            return Err(validation(format!(
                "{:?} view written into a {:?} heap",
                view.heap_type(),
                state.heaps[&heap].heap_type
            )));
        }

        let resource = match view {
            ViewDescription::ConstantBuffer(cbv) => {
                if self.validation && cbv.size_in_bytes % 256 != 0 {
                    return Err(validation(format!(
                        "constant buffer view size {} is not 256-byte aligned",
                        cbv.size_in_bytes
                    )));
                }
                Some(state.resolve_address(cbv.buffer_location)?.0)
            }
            ViewDescription::Sampler(_) => None,
            _ => {
                let id = resource.ok_or_else(|| validation("view requires a resource"))?;
                let flags = state.resource(id)?.descriptor.flags;
                let allowed = match view {
                    ViewDescription::RenderTarget(_) => {
                        flags.contains(ResourceFlags::ALLOW_RENDER_TARGET)
                    }
                    ViewDescription::DepthStencil(_) => {
                        flags.contains(ResourceFlags::ALLOW_DEPTH_STENCIL)
                    }
                    ViewDescription::UnorderedAccess(_) => {
                        flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS)
                    }
                    _ => !flags.contains(ResourceFlags::DENY_SHADER_RESOURCE),
                };
                if self.validation && !allowed {
                    return Err(validation(format!(
                        "resource flags {flags:?} do not allow a {:?} view",
                        view.heap_type()
                    )));
                }
                Some(id)
            }
        };

        if let Some(heap_state) = state.heaps.get_mut(&heap) {
            heap_state.slots[slot] = Some(DescriptorRecord {
                resource,
                view: *view,
            });
        }
        Ok(())
    }

    fn copy_descriptors(
        &self,
        dest: CpuDescriptorHandle,
        sources: &[CpuDescriptorHandle],
        heap_type: DescriptorHeapType,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let (dest_heap, dest_slot) = state.locate_cpu(dest)?;
        let dest_state = &state.heaps[&dest_heap];
        if dest_state.heap_type != heap_type {
            return Err(validation("copy_descriptors destination heap type mismatch"));
        }
        if dest_slot + sources.len() > dest_state.slots.len() {
            return Err(validation("copy_descriptors runs past the destination heap"));
        }

        let mut records = Vec::with_capacity(sources.len());
        for source in sources {
            let (heap, slot) = state.locate_cpu(*source)?;
            let source_heap = &state.heaps[&heap];
            if source_heap.heap_type != heap_type {
                return Err(validation("copy_descriptors source heap type mismatch"));
            }
            if self.validation && source_heap.shader_visible {
                return Err(validation(
                    "copy_descriptors source must be a CPU-only descriptor heap",
                ));
            }
            records.push(source_heap.slots[slot]);
        }

        if let Some(dest_state) = state.heaps.get_mut(&dest_heap) {
            for (i, record) in records.into_iter().enumerate() {
                dest_state.slots[dest_slot + i] = record;
            }
        }
        Ok(())
    }

    fn create_resource(
        &self,
        descriptor: &ResourceDescriptor,
        heap_type: HeapType,
        initial_state: ResourceStates,
    ) -> GraphicsResult<ResourceId> {
        log::trace!(
            "DummyBackend: creating resource {} ({} bytes, {:?})",
            descriptor.label.as_deref().unwrap_or("(unnamed)"),
            descriptor.size_in_bytes(),
            heap_type
        );
        let mut state = self.state.lock();
        self.create_resource_locked(&mut state, descriptor, heap_type, initial_state)
    }

    fn destroy_resource(&self, resource: ResourceId) {
        self.state.lock().release_resource(resource);
    }

    fn gpu_virtual_address(&self, resource: ResourceId) -> GraphicsResult<u64> {
        let state = self.state.lock();
        let resource_state = state.resource(resource)?;
        if !resource_state.descriptor.is_buffer() {
            return Err(GraphicsError::InvalidParameter(
                "only buffers have GPU virtual addresses".into(),
            ));
        }
        Ok(resource.0 << RESOURCE_WINDOW_SHIFT)
    }

    fn write_resource(&self, resource: ResourceId, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let target = state.resource_mut(resource)?;
        if !target.heap_type.is_cpu_writable() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} heap resources are not CPU writable",
                target.heap_type
            )));
        }
        state::write_range(target, offset, data)
    }

    fn read_resource(
        &self,
        resource: ResourceId,
        offset: u64,
        out: &mut [u8],
    ) -> GraphicsResult<()> {
        let state = self.state.lock();
        let source = state.resource(resource)?;
        if !source.heap_type.is_cpu_readable() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} heap resources are not CPU readable",
                source.heap_type
            )));
        }
        let bytes = state::read_range(source, offset, out.len() as u64)?;
        out.copy_from_slice(&bytes);
        Ok(())
    }

    fn create_root_signature(
        &self,
        descriptor: &RootSignatureDescriptor,
    ) -> GraphicsResult<RootSignatureId> {
        let id = RootSignatureId(self.next_id());
        self.state
            .lock()
            .root_signatures
            .insert(id, descriptor.parameters.len());
        Ok(id)
    }

    fn destroy_root_signature(&self, root_signature: RootSignatureId) {
        self.state.lock().root_signatures.remove(&root_signature);
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
        root_signature: RootSignatureId,
    ) -> GraphicsResult<PipelineId> {
        let mut state = self.state.lock();
        if !state.root_signatures.contains_key(&root_signature) {
            return Err(validation(format!("unknown root signature {root_signature:?}")));
        }
        log::trace!(
            "DummyBackend: creating graphics pipeline {} (vs {} bytes)",
            descriptor.label.as_deref().unwrap_or("(unnamed)"),
            descriptor.vertex_shader.bytes().len()
        );
        let id = PipelineId(self.next_id());
        state.pipelines.insert(id, PipelineKind::Graphics);
        Ok(id)
    }

    fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
        root_signature: RootSignatureId,
    ) -> GraphicsResult<PipelineId> {
        let mut state = self.state.lock();
        if !state.root_signatures.contains_key(&root_signature) {
            return Err(validation(format!("unknown root signature {root_signature:?}")));
        }
        log::trace!(
            "DummyBackend: creating compute pipeline {}",
            descriptor.label.as_deref().unwrap_or("(unnamed)")
        );
        let id = PipelineId(self.next_id());
        state.pipelines.insert(id, PipelineKind::Compute);
        Ok(id)
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        self.state.lock().pipelines.remove(&pipeline);
    }

    fn create_command_allocator(&self, list_type: CommandListType) -> GraphicsResult<AllocatorId> {
        let id = AllocatorId(self.next_id());
        self.state.lock().allocators.insert(
            id,
            AllocatorState {
                list_type,
                pending: 0,
            },
        );
        Ok(id)
    }

    fn reset_command_allocator(&self, allocator: AllocatorId) -> GraphicsResult<()> {
        let state = self.state.lock();
        let allocator_state = state
            .allocators
            .get(&allocator)
            .ok_or_else(|| validation(format!("unknown command allocator {allocator:?}")))?;
        if allocator_state.pending > 0 {
            return Err(validation(format!(
                "command allocator {allocator:?} reset while {} submitted list(s) are still executing",
                allocator_state.pending
            )));
        }
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: AllocatorId) {
        self.state.lock().allocators.remove(&allocator);
    }

    fn create_command_list(
        &self,
        list_type: CommandListType,
        allocator: AllocatorId,
        initial_pipeline: Option<PipelineId>,
    ) -> GraphicsResult<ListId> {
        let mut state = self.state.lock();
        let allocator_type = state
            .allocators
            .get(&allocator)
            .map(|a| a.list_type)
            .ok_or_else(|| validation(format!("unknown command allocator {allocator:?}")))?;
        if allocator_type != list_type {
            return Err(validation(format!(
                "{list_type:?} command list needs a {list_type:?} allocator, got {allocator_type:?}"
            )));
        }
        let id = ListId(self.next_id());
        state.lists.insert(
            id,
            ListState {
                list_type,
                allocator,
                open: true,
                commands: Vec::new(),
                pipeline: initial_pipeline,
            },
        );
        Ok(id)
    }

    fn reset_command_list(
        &self,
        list: ListId,
        allocator: AllocatorId,
        initial_pipeline: Option<PipelineId>,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let allocator_type = state
            .allocators
            .get(&allocator)
            .map(|a| a.list_type)
            .ok_or_else(|| validation(format!("unknown command allocator {allocator:?}")))?;
        let list_state = state
            .lists
            .get_mut(&list)
            .ok_or_else(|| validation(format!("unknown command list {list:?}")))?;
        if list_state.open {
            return Err(validation("reset of a command list that is still recording"));
        }
        if allocator_type != list_state.list_type {
            return Err(validation("command list reset with an allocator of another type"));
        }
        list_state.open = true;
        list_state.allocator = allocator;
        list_state.commands.clear();
        list_state.pipeline = initial_pipeline;
        Ok(())
    }

    fn close_command_list(&self, list: ListId) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let list_state = state
            .lists
            .get_mut(&list)
            .ok_or_else(|| validation(format!("unknown command list {list:?}")))?;
        if !list_state.open {
            return Err(validation("close of a command list that is not recording"));
        }
        list_state.open = false;
        Ok(())
    }

    fn record(&self, list: ListId, command: Command) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let list_state = state
            .lists
            .get(&list)
            .ok_or_else(|| validation(format!("unknown command list {list:?}")))?;
        if !list_state.open {
            return Err(validation(format!(
                "{} recorded into a closed command list",
                command.name()
            )));
        }
        if self.validation {
            state.check_command(list_state, &command)?;
        }
        if let Some(list_state) = state.lists.get_mut(&list) {
            if let Command::SetPipelineState(pipeline) = command {
                list_state.pipeline = Some(pipeline);
            }
            list_state.commands.push(command);
        }
        Ok(())
    }

    fn destroy_command_list(&self, list: ListId) {
        self.state.lock().lists.remove(&list);
    }

    fn create_queue(&self, queue_type: QueueType) -> GraphicsResult<QueueId> {
        let id = QueueId(self.next_id());
        self.state.lock().queues.insert(
            id,
            QueueState {
                queue_type,
                ops: VecDeque::new(),
            },
        );
        Ok(id)
    }

    fn destroy_queue(&self, queue: QueueId) {
        self.state.lock().queues.remove(&queue);
    }

    fn execute_command_lists(&self, queue: QueueId, lists: &[ListId]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let queue_type = state
            .queues
            .get(&queue)
            .map(|q| q.queue_type)
            .ok_or_else(|| validation(format!("unknown queue {queue:?}")))?;

        let mut submitted = Vec::with_capacity(lists.len());
        for list in lists {
            let list_state = state
                .lists
                .get(list)
                .ok_or_else(|| validation(format!("unknown command list {list:?}")))?;
            if list_state.open {
                return Err(validation(format!(
                    "command list {list:?} executed while still recording"
                )));
            }
            if list_state.list_type != queue_type.list_type() {
                return Err(validation(format!(
                    "{:?} command list executed on a {queue_type:?} queue",
                    list_state.list_type
                )));
            }
            submitted.push(SubmittedList {
                list: *list,
                allocator: list_state.allocator,
                commands: list_state.commands.clone(),
            });
        }
        for entry in &submitted {
            if let Some(allocator) = state.allocators.get_mut(&entry.allocator) {
                allocator.pending += 1;
            }
        }

        log::trace!(
            "DummyBackend: queue {queue:?} received {} command list(s)",
            submitted.len()
        );
        if let Some(queue_state) = state.queues.get_mut(&queue) {
            queue_state.ops.push_back(QueueOp::Execute(submitted));
        }
        self.pump(&mut state)
    }

    fn signal(&self, queue: QueueId, fence: FenceId, value: u64) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.fence(fence)?;
        state
            .queues
            .get_mut(&queue)
            .ok_or_else(|| validation(format!("unknown queue {queue:?}")))?
            .ops
            .push_back(QueueOp::Signal(fence, value));
        self.pump(&mut state)
    }

    fn queue_wait(&self, queue: QueueId, fence: FenceId, value: u64) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.fence(fence)?;
        state
            .queues
            .get_mut(&queue)
            .ok_or_else(|| validation(format!("unknown queue {queue:?}")))?
            .ops
            .push_back(QueueOp::Wait(fence, value));
        self.pump(&mut state)
    }

    fn create_fence(&self, initial_value: u64) -> GraphicsResult<FenceId> {
        let id = FenceId(self.next_id());
        self.state
            .lock()
            .fences
            .insert(id, std::sync::Arc::new(DummyFence::new(initial_value)));
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.state.lock().fences.remove(&fence);
    }

    fn fence_completed_value(&self, fence: FenceId) -> GraphicsResult<u64> {
        Ok(self.state.lock().fence(fence)?.completed())
    }

    fn wait_for_fence(&self, fence: FenceId, value: u64) -> GraphicsResult<()> {
        // The state lock must not be held while blocking, or no other thread
        // could advance the timeline.
        let fence = self.state.lock().fence(fence)?;
        let mut completed = fence.value.lock();
        while *completed < value {
            fence.condvar.wait(&mut completed);
        }
        Ok(())
    }

    fn wait_for_fence_timeout(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> GraphicsResult<bool> {
        let fence = self.state.lock().fence(fence)?;
        let deadline = Instant::now() + timeout;
        let mut completed = fence.value.lock();
        while *completed < value {
            if fence.condvar.wait_until(&mut completed, deadline).timed_out() {
                return Ok(*completed >= value);
            }
        }
        Ok(true)
    }

    fn create_swap_chain(
        &self,
        queue: QueueId,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<SwapChainId> {
        if !(2..=16).contains(&descriptor.buffer_count) {
            return Err(GraphicsError::out_of_range(
                "swap chain buffer count",
                u64::from(descriptor.buffer_count),
                2,
                16,
            ));
        }
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.format.is_depth() {
            return Err(GraphicsError::InvalidParameter(format!(
                "invalid swap chain {}x{} {:?}",
                descriptor.width, descriptor.height, descriptor.format
            )));
        }

        let mut state = self.state.lock();
        if !state.queues.contains_key(&queue) {
            return Err(validation(format!("unknown queue {queue:?}")));
        }
        let buffers = self.create_back_buffers(&mut state, descriptor)?;
        let id = SwapChainId(self.next_id());
        state.swap_chains.insert(
            id,
            SwapChainState {
                descriptor: *descriptor,
                buffers,
                current: 0,
            },
        );
        Ok(id)
    }

    fn destroy_swap_chain(&self, swap_chain: SwapChainId) {
        let mut state = self.state.lock();
        if let Some(chain) = state.swap_chains.remove(&swap_chain) {
            for buffer in chain.buffers {
                state.release_resource(buffer);
            }
        }
    }

    fn swap_chain_buffer(&self, swap_chain: SwapChainId, index: u32) -> GraphicsResult<ResourceId> {
        let mut state = self.state.lock();
        let chain = state
            .swap_chains
            .get(&swap_chain)
            .ok_or_else(|| validation(format!("unknown swap chain {swap_chain:?}")))?;
        let buffer = *chain.buffers.get(index as usize).ok_or_else(|| {
            GraphicsError::out_of_range(
                "back buffer index",
                u64::from(index),
                0,
                chain.buffers.len() as u64 - 1,
            )
        })?;
        state.resource_mut(buffer)?.refs += 1;
        Ok(buffer)
    }

    fn current_back_buffer_index(&self, swap_chain: SwapChainId) -> GraphicsResult<u32> {
        self.state
            .lock()
            .swap_chains
            .get(&swap_chain)
            .map(|chain| chain.current)
            .ok_or_else(|| validation(format!("unknown swap chain {swap_chain:?}")))
    }

    fn present(&self, swap_chain: SwapChainId, sync_interval: u32) -> Result<(), PresentError> {
        let mut state = self.state.lock();
        if state.device_removed {
            return Err(PresentError::DeviceRemoved);
        }
        if let Some(error) = state.injected_present_error.take() {
            return Err(error);
        }
        if sync_interval > 4 {
            return Err(PresentError::Other(format!(
                "sync interval {sync_interval} is out of range [0, 4]"
            )));
        }
        let chain = state
            .swap_chains
            .get_mut(&swap_chain)
            .ok_or_else(|| PresentError::Other(format!("unknown swap chain {swap_chain:?}")))?;
        chain.current = (chain.current + 1) % chain.descriptor.buffer_count;
        state.stats.presents += 1;
        Ok(())
    }

    fn resize_swap_chain(
        &self,
        swap_chain: SwapChainId,
        width: u32,
        height: u32,
    ) -> GraphicsResult<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "invalid swap chain size {width}x{height}"
            )));
        }
        let mut state = self.state.lock();
        let chain = state
            .swap_chains
            .get(&swap_chain)
            .ok_or_else(|| validation(format!("unknown swap chain {swap_chain:?}")))?;
        let old_buffers = chain.buffers.clone();
        let mut descriptor = chain.descriptor;
        let held = old_buffers
            .iter()
            .any(|b| state.resources.get(b).is_some_and(|r| r.refs > 1));
        if held {
            return Err(validation(
                "swap chain resized while back buffer references are still held",
            ));
        }

        descriptor.width = width;
        descriptor.height = height;
        let buffers = self.create_back_buffers(&mut state, &descriptor)?;
        for buffer in old_buffers {
            state.release_resource(buffer);
        }
        if let Some(chain) = state.swap_chains.get_mut(&swap_chain) {
            chain.descriptor = descriptor;
            chain.buffers = buffers;
            chain.current = 0;
        }
        Ok(())
    }
}

impl DummyBackend {
    fn create_back_buffers(
        &self,
        state: &mut DummyState,
        descriptor: &SwapChainDescriptor,
    ) -> GraphicsResult<Vec<ResourceId>> {
        (0..descriptor.buffer_count)
            .map(|i| {
                let resource =
                    ResourceDescriptor::texture_2d(descriptor.width, descriptor.height, descriptor.format)
                        .with_flags(ResourceFlags::ALLOW_RENDER_TARGET)
                        .with_label(format!("Back Buffer {i}"));
                self.create_resource_locked(state, &resource, HeapType::Default, ResourceStates::PRESENT)
            })
            .collect()
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DescriptorHeapFlags, RenderTargetViewDescription};

    fn buffer(backend: &DummyBackend, heap: HeapType, size: u64) -> ResourceId {
        let state = match heap {
            HeapType::Default => ResourceStates::COMMON,
            HeapType::Upload => ResourceStates::GENERIC_READ,
            HeapType::Readback => ResourceStates::COPY_DEST,
        };
        backend
            .create_resource(&ResourceDescriptor::buffer(size), heap, state)
            .unwrap()
    }

    fn direct_list(backend: &DummyBackend) -> (AllocatorId, ListId) {
        let allocator = backend
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let list = backend
            .create_command_list(CommandListType::Direct, allocator, None)
            .unwrap();
        (allocator, list)
    }

    #[test]
    fn test_dummy_backend_name() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
        assert_eq!(backend.enumerate_adapters().len(), 1);
    }

    #[test]
    fn test_heap_addresses_are_disjoint() {
        let backend = DummyBackend::new();
        let desc = DescriptorHeapDescriptor::new(
            DescriptorHeapType::CbvSrvUav,
            16,
            DescriptorHeapFlags::empty(),
        );
        let a = backend.create_descriptor_heap(&desc).unwrap();
        let b = backend.create_descriptor_heap(&desc).unwrap();
        let a_start = backend.heap_cpu_start(a).unwrap();
        let b_start = backend.heap_cpu_start(b).unwrap();
        assert_ne!(a_start, b_start);
        assert!(backend.heap_gpu_start(a).is_err());
    }

    #[test]
    fn test_rtv_heap_cannot_be_shader_visible() {
        let backend = DummyBackend::new();
        let desc =
            DescriptorHeapDescriptor::new(DescriptorHeapType::Rtv, 4, DescriptorHeapFlags::SHADER_VISIBLE);
        assert!(backend.create_descriptor_heap(&desc).is_err());
    }

    #[test]
    fn test_copy_buffer_region_moves_bytes() {
        let backend = DummyBackend::new();
        let upload = buffer(&backend, HeapType::Upload, 64);
        let readback = buffer(&backend, HeapType::Readback, 64);
        backend.write_resource(upload, 0, &[7u8; 64]).unwrap();

        let queue = backend.create_queue(QueueType::Direct).unwrap();
        let (_allocator, list) = direct_list(&backend);
        backend
            .record(
                list,
                Command::CopyBufferRegion {
                    dst: readback,
                    dst_offset: 0,
                    src: upload,
                    src_offset: 0,
                    size: 64,
                },
            )
            .unwrap();
        backend.close_command_list(list).unwrap();
        backend.execute_command_lists(queue, &[list]).unwrap();

        let mut out = [0u8; 64];
        backend.read_resource(readback, 0, &mut out).unwrap();
        assert_eq!(out, [7u8; 64]);
        assert_eq!(backend.stats().copies, 1);
    }

    #[test]
    fn test_deferred_timeline_holds_work() {
        let backend = DummyBackend::new().with_timeline(GpuTimeline::Deferred);
        let queue = backend.create_queue(QueueType::Direct).unwrap();
        let fence = backend.create_fence(0).unwrap();

        backend.signal(queue, fence, 1).unwrap();
        backend.signal(queue, fence, 2).unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 0);
        assert_eq!(backend.pending_operation_count(), 2);

        assert!(backend.step_queue(queue).unwrap());
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 1);

        backend.flush().unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 2);
        assert!(!backend.step_queue(queue).unwrap());
    }

    #[test]
    fn test_allocator_reset_while_pending_fails() {
        let backend = DummyBackend::new().with_timeline(GpuTimeline::Deferred);
        let queue = backend.create_queue(QueueType::Direct).unwrap();
        let (allocator, list) = direct_list(&backend);
        backend.close_command_list(list).unwrap();
        backend.execute_command_lists(queue, &[list]).unwrap();

        assert!(matches!(
            backend.reset_command_allocator(allocator),
            Err(GraphicsError::Validation(_))
        ));
        backend.flush().unwrap();
        assert!(backend.reset_command_allocator(allocator).is_ok());
    }

    #[test]
    fn test_cross_queue_wait_blocks_until_signal() {
        let backend = DummyBackend::new().with_timeline(GpuTimeline::Deferred);
        let direct = backend.create_queue(QueueType::Direct).unwrap();
        let copy = backend.create_queue(QueueType::Copy).unwrap();
        let fence = backend.create_fence(0).unwrap();
        let done = backend.create_fence(0).unwrap();

        backend.queue_wait(direct, fence, 1).unwrap();
        backend.signal(direct, done, 1).unwrap();
        assert!(!backend.step_queue(direct).unwrap());

        backend.signal(copy, fence, 1).unwrap();
        backend.flush().unwrap();
        assert_eq!(backend.fence_completed_value(done).unwrap(), 1);
    }

    #[test]
    fn test_clear_render_target_writes_texels() {
        let backend = DummyBackend::new();
        let texture = backend
            .create_resource(
                &ResourceDescriptor::texture_2d(2, 2, crate::types::Format::R8G8B8A8Unorm)
                    .with_flags(ResourceFlags::ALLOW_RENDER_TARGET),
                HeapType::Default,
                ResourceStates::RENDER_TARGET,
            )
            .unwrap();
        let heap = backend
            .create_descriptor_heap(&DescriptorHeapDescriptor::new(
                DescriptorHeapType::Rtv,
                1,
                DescriptorHeapFlags::empty(),
            ))
            .unwrap();
        let rtv = backend.heap_cpu_start(heap).unwrap();
        backend
            .create_view(
                Some(texture),
                &ViewDescription::RenderTarget(RenderTargetViewDescription::default()),
                rtv,
            )
            .unwrap();

        let queue = backend.create_queue(QueueType::Direct).unwrap();
        let (_allocator, list) = direct_list(&backend);
        backend
            .record(
                list,
                Command::ClearRenderTargetView {
                    view: rtv,
                    color: [1.0, 0.0, 0.0, 1.0],
                },
            )
            .unwrap();
        backend.close_command_list(list).unwrap();
        backend.execute_command_lists(queue, &[list]).unwrap();

        let bytes = backend.resource_bytes(texture).unwrap();
        assert_eq!(&bytes[0..4], &[255, 0, 0, 255]);
        assert_eq!(&bytes[12..16], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_draw_without_pipeline_is_rejected() {
        let backend = DummyBackend::new();
        let (_allocator, list) = direct_list(&backend);
        let result = backend.record(
            list,
            Command::DrawInstanced {
                vertex_count: 3,
                instance_count: 1,
                start_vertex: 0,
                start_instance: 0,
            },
        );
        assert!(matches!(result, Err(GraphicsError::Validation(_))));
    }

    #[test]
    fn test_present_cycles_back_buffers() {
        let backend = DummyBackend::new();
        let queue = backend.create_queue(QueueType::Direct).unwrap();
        let chain = backend
            .create_swap_chain(
                queue,
                &SwapChainDescriptor {
                    width: 4,
                    height: 4,
                    format: crate::types::Format::B8G8R8A8Unorm,
                    buffer_count: 3,
                },
            )
            .unwrap();
        for expected in [0, 1, 2, 0] {
            assert_eq!(backend.current_back_buffer_index(chain).unwrap(), expected);
            backend.present(chain, 1).unwrap();
        }

        backend.simulate_device_removed();
        assert_eq!(backend.present(chain, 1), Err(PresentError::DeviceRemoved));
    }

    #[test]
    fn test_resize_requires_released_buffers() {
        let backend = DummyBackend::new();
        let queue = backend.create_queue(QueueType::Direct).unwrap();
        let chain = backend
            .create_swap_chain(
                queue,
                &SwapChainDescriptor {
                    width: 4,
                    height: 4,
                    format: crate::types::Format::B8G8R8A8Unorm,
                    buffer_count: 2,
                },
            )
            .unwrap();
        let buffer = backend.swap_chain_buffer(chain, 0).unwrap();
        assert!(backend.resize_swap_chain(chain, 8, 8).is_err());
        backend.destroy_resource(buffer);
        assert!(backend.resize_swap_chain(chain, 8, 8).is_ok());
        assert_eq!(backend.live_resource_count(), 2);
    }
}
