//! Object tables and the software execution engine of the dummy backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::descriptors::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::error::{GraphicsError, GraphicsResult, PresentError};
use crate::pipeline::PipelineKind;
use crate::types::{
    ClearFlags, CommandListType, DescriptorHeapType, Format, HeapType, QueueType,
    ResourceDescriptor, ResourceStates, ViewDescription,
};

use super::super::{
    AllocatorId, Command, DescriptorRecord, FenceId, HeapId, ListId, PipelineId, QueueId,
    ResourceBarrier, ResourceId, RootSignatureId, SwapChainDescriptor, SwapChainId,
};
use super::{DummyStats, GpuTimeline};

/// Base of the synthetic CPU descriptor address space.
pub(super) const CPU_DESCRIPTOR_BASE: u64 = 0x0000_1000_0000_0000;
/// Base of the synthetic GPU descriptor address space.
pub(super) const GPU_DESCRIPTOR_BASE: u64 = 0x8000_0000_0000_0000;
/// Each heap owns a 16 MiB window of descriptor address space.
pub(super) const HEAP_WINDOW_SHIFT: u32 = 24;
/// Each resource owns a 4 GiB window of GPU virtual address space.
pub(super) const RESOURCE_WINDOW_SHIFT: u32 = 32;
/// Largest committed resource the software GPU will back with memory.
pub(super) const MAX_RESOURCE_SIZE: u64 = 1 << 30;

pub(super) fn validation(message: impl Into<String>) -> GraphicsError {
    GraphicsError::Validation(message.into())
}

pub(super) fn increment_size(heap_type: DescriptorHeapType) -> u32 {
    match heap_type {
        DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler | DescriptorHeapType::Rtv => 32,
        DescriptorHeapType::Dsv => 8,
    }
}

pub(super) struct HeapState {
    pub heap_type: DescriptorHeapType,
    pub shader_visible: bool,
    pub slots: Vec<Option<DescriptorRecord>>,
}

pub(super) struct ResourceState {
    pub descriptor: ResourceDescriptor,
    pub heap_type: HeapType,
    pub data: Vec<u8>,
    pub refs: u32,
}

pub(super) struct AllocatorState {
    pub list_type: CommandListType,
    /// Submitted lists recorded against this allocator not yet executed.
    pub pending: u32,
}

pub(super) struct ListState {
    pub list_type: CommandListType,
    pub allocator: AllocatorId,
    pub open: bool,
    pub commands: Vec<Command>,
    pub pipeline: Option<PipelineId>,
}

pub(super) struct SubmittedList {
    pub list: ListId,
    pub allocator: AllocatorId,
    pub commands: Vec<Command>,
}

pub(super) enum QueueOp {
    Execute(Vec<SubmittedList>),
    Signal(FenceId, u64),
    Wait(FenceId, u64),
}

pub(super) struct QueueState {
    pub queue_type: QueueType,
    pub ops: VecDeque<QueueOp>,
}

pub(super) struct DummyFence {
    pub value: Mutex<u64>,
    pub condvar: Condvar,
}

impl DummyFence {
    pub fn new(value: u64) -> Self {
        Self {
            value: Mutex::new(value),
            condvar: Condvar::new(),
        }
    }

    pub fn completed(&self) -> u64 {
        *self.value.lock()
    }

    pub fn set(&self, value: u64) {
        *self.value.lock() = value;
        self.condvar.notify_all();
    }
}

pub(super) struct SwapChainState {
    pub descriptor: SwapChainDescriptor,
    pub buffers: Vec<ResourceId>,
    pub current: u32,
}

/// Result of advancing one queue by one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Idle,
    Executed,
    Signaled(u64),
    Waited,
}

#[derive(Default)]
pub(super) struct DummyState {
    pub heaps: HashMap<HeapId, HeapState>,
    pub resources: HashMap<ResourceId, ResourceState>,
    pub allocators: HashMap<AllocatorId, AllocatorState>,
    pub lists: HashMap<ListId, ListState>,
    pub queues: HashMap<QueueId, QueueState>,
    pub fences: HashMap<FenceId, Arc<DummyFence>>,
    pub root_signatures: HashMap<RootSignatureId, usize>,
    pub pipelines: HashMap<PipelineId, PipelineKind>,
    pub swap_chains: HashMap<SwapChainId, SwapChainState>,
    pub timeline: GpuTimeline,
    pub stats: DummyStats,
    pub device_removed: bool,
    pub injected_present_error: Option<PresentError>,
}

impl DummyState {
    // ---- lookups ----

    pub fn resource(&self, id: ResourceId) -> GraphicsResult<&ResourceState> {
        self.resources
            .get(&id)
            .ok_or_else(|| validation(format!("unknown resource {id:?}")))
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> GraphicsResult<&mut ResourceState> {
        self.resources
            .get_mut(&id)
            .ok_or_else(|| validation(format!("unknown resource {id:?}")))
    }

    pub fn fence(&self, id: FenceId) -> GraphicsResult<Arc<DummyFence>> {
        self.fences
            .get(&id)
            .cloned()
            .ok_or_else(|| validation(format!("unknown fence {id:?}")))
    }

    /// Map a CPU handle to its heap and slot index.
    pub fn locate_cpu(&self, handle: CpuDescriptorHandle) -> GraphicsResult<(HeapId, usize)> {
        self.locate(handle.ptr, CPU_DESCRIPTOR_BASE)
    }

    /// Map a GPU handle to its heap and slot index.
    pub fn locate_gpu(&self, handle: GpuDescriptorHandle) -> GraphicsResult<(HeapId, usize)> {
        let (heap, slot) = self.locate(handle.ptr, GPU_DESCRIPTOR_BASE)?;
        if !self.heaps[&heap].shader_visible {
            return Err(validation("GPU handle into a non shader-visible heap"));
        }
        Ok((heap, slot))
    }

    fn locate(&self, ptr: u64, base: u64) -> GraphicsResult<(HeapId, usize)> {
        let relative = ptr
            .checked_sub(base)
            .ok_or_else(|| validation(format!("descriptor handle {ptr:#x} is not in any heap")))?;
        let heap = HeapId(relative >> HEAP_WINDOW_SHIFT);
        let offset = relative & ((1 << HEAP_WINDOW_SHIFT) - 1);
        let state = self
            .heaps
            .get(&heap)
            .ok_or_else(|| validation(format!("descriptor handle {ptr:#x} is not in any heap")))?;
        let increment = u64::from(increment_size(state.heap_type));
        if offset % increment != 0 {
            return Err(validation(format!(
                "descriptor handle {ptr:#x} is not aligned to the heap increment"
            )));
        }
        let slot = (offset / increment) as usize;
        if slot >= state.slots.len() {
            return Err(validation(format!(
                "descriptor handle {ptr:#x} is past the end of its heap"
            )));
        }
        Ok((heap, slot))
    }

    pub fn record_at(&self, handle: CpuDescriptorHandle) -> GraphicsResult<DescriptorRecord> {
        let (heap, slot) = self.locate_cpu(handle)?;
        self.heaps[&heap].slots[slot]
            .ok_or_else(|| validation(format!("descriptor {:#x} was never written", handle.ptr)))
    }

    /// Resolve a GPU virtual address to the buffer it falls in.
    pub fn resolve_address(&self, address: u64) -> GraphicsResult<(ResourceId, u64)> {
        let id = ResourceId(address >> RESOURCE_WINDOW_SHIFT);
        let offset = address & ((1 << RESOURCE_WINDOW_SHIFT) - 1);
        let resource = self
            .resources
            .get(&id)
            .ok_or_else(|| validation(format!("address {address:#x} is not in any resource")))?;
        if offset >= resource.data.len() as u64 {
            return Err(validation(format!(
                "address {address:#x} is past the end of its resource"
            )));
        }
        Ok((id, offset))
    }

    pub fn release_resource(&mut self, id: ResourceId) {
        if let Some(resource) = self.resources.get_mut(&id) {
            resource.refs -= 1;
            if resource.refs == 0 {
                self.resources.remove(&id);
            }
        }
    }

    // ---- recording checks ----

    pub fn check_command(&self, list: &ListState, command: &Command) -> GraphicsResult<()> {
        if !command.is_allowed_in(list.list_type) {
            return Err(validation(format!(
                "{} is not allowed in a {:?} command list",
                command.name(),
                list.list_type
            )));
        }
        match command {
            Command::ResourceBarrier(barriers) => {
                for barrier in barriers {
                    match *barrier {
                        ResourceBarrier::Transition {
                            resource,
                            before,
                            after,
                        } => {
                            self.resource(resource)?;
                            if before == after {
                                return Err(validation(format!(
                                    "transition barrier on {resource:?} with identical states {before:?}"
                                )));
                            }
                        }
                        ResourceBarrier::Uav { resource } => {
                            self.resource(resource)?;
                        }
                    }
                }
            }
            Command::SetDescriptorHeaps(heaps) => {
                let mut seen = Vec::with_capacity(heaps.len());
                for heap in heaps {
                    let state = self
                        .heaps
                        .get(heap)
                        .ok_or_else(|| validation(format!("unknown heap {heap:?}")))?;
                    if !state.shader_visible {
                        return Err(validation("bound descriptor heap is not shader visible"));
                    }
                    if seen.contains(&state.heap_type) {
                        return Err(validation("two descriptor heaps of the same type bound"));
                    }
                    seen.push(state.heap_type);
                }
            }
            Command::SetPipelineState(pipeline) => {
                if !self.pipelines.contains_key(pipeline) {
                    return Err(validation(format!("unknown pipeline {pipeline:?}")));
                }
            }
            Command::SetGraphicsRootSignature(root) | Command::SetComputeRootSignature(root) => {
                if !self.root_signatures.contains_key(root) {
                    return Err(validation(format!("unknown root signature {root:?}")));
                }
            }
            Command::SetGraphicsRootDescriptorTable { base, .. }
            | Command::SetComputeRootDescriptorTable { base, .. } => {
                self.locate_gpu(*base)?;
            }
            Command::SetRenderTargets {
                render_targets,
                depth_stencil,
            } => {
                for rtv in render_targets {
                    let record = self.record_at(*rtv)?;
                    if !matches!(record.view, ViewDescription::RenderTarget(_)) {
                        return Err(validation("render target slot does not hold an RTV"));
                    }
                }
                if let Some(dsv) = depth_stencil
                    && !matches!(self.record_at(*dsv)?.view, ViewDescription::DepthStencil(_))
                {
                    return Err(validation("depth stencil slot does not hold a DSV"));
                }
            }
            Command::ClearRenderTargetView { view, .. } => {
                if !matches!(self.record_at(*view)?.view, ViewDescription::RenderTarget(_)) {
                    return Err(validation("cleared view is not an RTV"));
                }
            }
            Command::ClearDepthStencilView { view, .. } => {
                if !matches!(self.record_at(*view)?.view, ViewDescription::DepthStencil(_)) {
                    return Err(validation("cleared view is not a DSV"));
                }
            }
            Command::DrawInstanced { .. } | Command::DrawIndexedInstanced { .. } => {
                self.check_pipeline(list, PipelineKind::Graphics, command)?;
            }
            Command::Dispatch { .. } => {
                self.check_pipeline(list, PipelineKind::Compute, command)?;
            }
            Command::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                check_range(self.resource(*dst)?, *dst_offset, *size, "copy destination")?;
                check_range(self.resource(*src)?, *src_offset, *size, "copy source")?;
                self.check_copy_dest(*dst)?;
            }
            Command::CopyResource { dst, src } => {
                let dst_len = self.resource(*dst)?.data.len();
                let src_len = self.resource(*src)?.data.len();
                if dst_len != src_len {
                    return Err(validation(format!(
                        "copy_resource size mismatch: {dst_len} vs {src_len} bytes"
                    )));
                }
                self.check_copy_dest(*dst)?;
            }
            Command::CopyTextureRegion {
                dst,
                src,
                src_offset,
                src_row_pitch,
            } => {
                let texture = &self.resource(*dst)?.descriptor;
                if texture.is_buffer() {
                    return Err(validation("copy_texture_region destination is a buffer"));
                }
                let row = texture.row_pitch();
                if *src_row_pitch < row {
                    return Err(validation(format!(
                        "source row pitch {src_row_pitch} is smaller than texture row {row}"
                    )));
                }
                let needed = src_row_pitch * (u64::from(texture.height) - 1) + row;
                check_range(self.resource(*src)?, *src_offset, needed, "copy source")?;
                self.check_copy_dest(*dst)?;
            }
            Command::ExecuteBundle(bundle) => {
                let state = self
                    .lists
                    .get(bundle)
                    .ok_or_else(|| validation(format!("unknown bundle {bundle:?}")))?;
                if state.list_type != CommandListType::Bundle {
                    return Err(validation("execute_bundle with a non-bundle list"));
                }
                if state.open {
                    return Err(validation("execute_bundle with an open bundle"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_pipeline(
        &self,
        list: &ListState,
        kind: PipelineKind,
        command: &Command,
    ) -> GraphicsResult<()> {
        match list.pipeline.and_then(|p| self.pipelines.get(&p)) {
            Some(bound) if *bound == kind => Ok(()),
            Some(bound) => Err(validation(format!(
                "{} with a {bound:?} pipeline bound",
                command.name()
            ))),
            None => Err(validation(format!("{} without a pipeline", command.name()))),
        }
    }

    fn check_copy_dest(&self, dst: ResourceId) -> GraphicsResult<()> {
        if self.resource(dst)?.heap_type == HeapType::Upload {
            return Err(validation("upload heap resources cannot be copy destinations"));
        }
        Ok(())
    }

    // ---- timeline ----

    /// Advance `queue` by one operation if the front operation can run.
    pub fn step_queue(&mut self, queue: QueueId) -> GraphicsResult<Step> {
        let state = self
            .queues
            .get(&queue)
            .ok_or_else(|| validation(format!("unknown queue {queue:?}")))?;
        match state.ops.front() {
            None => return Ok(Step::Idle),
            Some(QueueOp::Wait(fence, value)) => {
                let reached = self.fences.get(fence).is_none_or(|f| f.completed() >= *value);
                if !reached {
                    return Ok(Step::Idle);
                }
            }
            Some(_) => {}
        }

        let Some(op) = self
            .queues
            .get_mut(&queue)
            .and_then(|state| state.ops.pop_front())
        else {
            return Ok(Step::Idle);
        };

        match op {
            QueueOp::Execute(lists) => {
                let mut result = Ok(());
                for submitted in lists {
                    if let Some(allocator) = self.allocators.get_mut(&submitted.allocator) {
                        allocator.pending = allocator.pending.saturating_sub(1);
                    }
                    log::trace!("DummyBackend: executing {:?}", submitted.list);
                    self.stats.lists_executed += 1;
                    for command in &submitted.commands {
                        if let Err(e) = self.execute(command) {
                            log::error!("DummyBackend: {} failed: {}", command.name(), e);
                            result = Err(e);
                        }
                    }
                }
                result.map(|_| Step::Executed)
            }
            QueueOp::Signal(fence, value) => {
                if let Some(fence) = self.fences.get(&fence) {
                    fence.set(value);
                }
                log::trace!("DummyBackend: fence {fence:?} reached {value}");
                Ok(Step::Signaled(value))
            }
            QueueOp::Wait(..) => Ok(Step::Waited),
        }
    }

    /// Run every queue until no operation can make progress.
    pub fn drain(&mut self) -> GraphicsResult<()> {
        let queues: Vec<QueueId> = self.queues.keys().copied().collect();
        loop {
            let mut progressed = false;
            for queue in &queues {
                while self.step_queue(*queue)? != Step::Idle {
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    pub fn pending_operations(&self) -> usize {
        self.queues.values().map(|q| q.ops.len()).sum()
    }

    // ---- execution ----

    fn execute(&mut self, command: &Command) -> GraphicsResult<()> {
        match command {
            Command::ResourceBarrier(barriers) => {
                self.stats.barriers += barriers.len() as u64;
            }
            Command::DrawInstanced { .. } | Command::DrawIndexedInstanced { .. } => {
                self.stats.draw_calls += 1;
            }
            Command::Dispatch { .. } => {
                self.stats.dispatches += 1;
            }
            Command::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let bytes = read_range(self.resource(*src)?, *src_offset, *size)?;
                write_range(self.resource_mut(*dst)?, *dst_offset, &bytes)?;
                self.stats.copies += 1;
            }
            Command::CopyResource { dst, src } => {
                let bytes = self.resource(*src)?.data.clone();
                write_range(self.resource_mut(*dst)?, 0, &bytes)?;
                self.stats.copies += 1;
            }
            Command::CopyTextureRegion {
                dst,
                src,
                src_offset,
                src_row_pitch,
            } => {
                let descriptor = self.resource(*dst)?.descriptor.clone();
                let row = descriptor.row_pitch();
                let mut texels = Vec::with_capacity(descriptor.size_in_bytes() as usize);
                let source = self.resource(*src)?;
                for y in 0..u64::from(descriptor.height) {
                    texels.extend(read_range(source, src_offset + y * src_row_pitch, row)?);
                }
                write_range(self.resource_mut(*dst)?, 0, &texels)?;
                self.stats.copies += 1;
            }
            Command::ClearRenderTargetView { view, color } => {
                let record = self.record_at(*view)?;
                let (Some(resource), ViewDescription::RenderTarget(desc)) =
                    (record.resource, record.view)
                else {
                    return Err(validation("cleared view is not an RTV"));
                };
                let target = self.resource_mut(resource)?;
                let format = if desc.format == Format::Unknown {
                    target.descriptor.format
                } else {
                    desc.format
                };
                match encode_color(format, *color) {
                    Some(texel) => fill(&mut target.data, &texel),
                    None => log::trace!("DummyBackend: no clear encoding for {format:?}"),
                }
                self.stats.clears += 1;
            }
            Command::ClearDepthStencilView {
                view,
                flags,
                depth,
                stencil,
            } => {
                let record = self.record_at(*view)?;
                let Some(resource) = record.resource else {
                    return Err(validation("cleared view has no resource"));
                };
                let target = self.resource_mut(resource)?;
                match target.descriptor.format {
                    Format::D32Float if flags.contains(ClearFlags::DEPTH) => {
                        fill(&mut target.data, &depth.to_le_bytes());
                    }
                    Format::D24UnormS8Uint => {
                        for texel in target.data.chunks_exact_mut(4) {
                            let mut packed = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                            if flags.contains(ClearFlags::DEPTH) {
                                let d = (depth.clamp(0.0, 1.0) * 16_777_215.0).round() as u32;
                                packed = (packed & 0xFF00_0000) | d;
                            }
                            if flags.contains(ClearFlags::STENCIL) {
                                packed = (packed & 0x00FF_FFFF) | (u32::from(*stencil) << 24);
                            }
                            texel.copy_from_slice(&packed.to_le_bytes());
                        }
                    }
                    _ => {}
                }
                self.stats.clears += 1;
            }
            Command::ExecuteBundle(bundle) => {
                let commands = self
                    .lists
                    .get(bundle)
                    .map(|state| state.commands.clone())
                    .unwrap_or_default();
                for command in &commands {
                    self.execute(command)?;
                }
                self.stats.bundles_executed += 1;
            }
            _ => {}
        }
        Ok(())
    }
}

fn check_range(resource: &ResourceState, offset: u64, size: u64, what: &str) -> GraphicsResult<()> {
    let len = resource.data.len() as u64;
    if offset.checked_add(size).is_none_or(|end| end > len) {
        return Err(validation(format!(
            "{what} range {offset}..{} exceeds resource size {len}",
            offset.saturating_add(size)
        )));
    }
    Ok(())
}

pub(super) fn read_range(resource: &ResourceState, offset: u64, size: u64) -> GraphicsResult<Vec<u8>> {
    check_range(resource, offset, size, "read")?;
    Ok(resource.data[offset as usize..(offset + size) as usize].to_vec())
}

pub(super) fn write_range(resource: &mut ResourceState, offset: u64, bytes: &[u8]) -> GraphicsResult<()> {
    check_range(resource, offset, bytes.len() as u64, "write")?;
    resource.data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn fill(data: &mut [u8], texel: &[u8]) {
    for chunk in data.chunks_exact_mut(texel.len()) {
        chunk.copy_from_slice(texel);
    }
}

/// Encode a clear color as one texel of `format`.
pub(super) fn encode_color(format: Format, color: [f32; 4]) -> Option<Vec<u8>> {
    let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    match format {
        Format::R8G8B8A8Unorm => Some(color.iter().map(|c| unorm(*c)).collect()),
        Format::B8G8R8A8Unorm => Some(vec![
            unorm(color[2]),
            unorm(color[1]),
            unorm(color[0]),
            unorm(color[3]),
        ]),
        Format::R32G32B32A32Float => Some(color.iter().flat_map(|c| c.to_le_bytes()).collect()),
        Format::R32Float => Some(color[0].to_le_bytes().to_vec()),
        _ => None,
    }
}

/// Initial contents of a resource's backing memory.
pub(super) fn allocate_storage(descriptor: &ResourceDescriptor) -> GraphicsResult<Vec<u8>> {
    let size = descriptor.size_in_bytes();
    if size == 0 {
        return Err(GraphicsError::ResourceCreationFailed(format!(
            "resource {:?} has zero size",
            descriptor.label
        )));
    }
    if size > MAX_RESOURCE_SIZE {
        return Err(GraphicsError::OutOfMemory);
    }
    Ok(vec![0; size as usize])
}

/// Initial state a resource in `heap_type` must be created in.
pub(super) fn required_initial_state(heap_type: HeapType) -> Option<ResourceStates> {
    match heap_type {
        HeapType::Default => None,
        HeapType::Upload => Some(ResourceStates::GENERIC_READ),
        HeapType::Readback => Some(ResourceStates::COPY_DEST),
    }
}
