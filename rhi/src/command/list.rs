//! Command recording and the closed, submittable form of a list.

use std::sync::Arc;

use crate::backend::{Command, GpuBackend, ListId, ResourceBarrier};
use crate::descriptors::{DescriptorAllocator, DescriptorSet, GpuDescriptorHandle};
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::pipeline::{PipelineState, RootSignature};
use crate::resources::{DepthStencilView, GraphicsResource, RenderTargetView};
use crate::types::{
    ClearFlags, CommandListType, DescriptorHeapType, IndexBufferView, PrimitiveTopology, Rect,
    ResourceStates, VertexBufferView, Viewport,
};

use super::CommandAllocator;

/// Owner of a native command list id, shared between a [`CommandList`] and
/// the [`CompiledCommandList`]s it produced.
struct NativeCommandList {
    backend: Arc<dyn GpuBackend>,
    id: ListId,
}

impl Drop for NativeCommandList {
    fn drop(&mut self) {
        self.backend.destroy_command_list(self.id);
    }
}

/// A closed command list, ready for submission.
///
/// Holds a strong reference to the command allocator the commands were
/// recorded into, so the allocator lives as long as any submission of it.
#[derive(Clone)]
pub struct CompiledCommandList {
    list: Arc<NativeCommandList>,
    allocator: Arc<CommandAllocator>,
    list_type: CommandListType,
}

impl CompiledCommandList {
    /// Get the native list id.
    pub fn native_id(&self) -> ListId {
        self.list.id
    }

    /// Type of the list.
    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    /// The allocator holding the recorded commands.
    pub fn allocator(&self) -> &Arc<CommandAllocator> {
        &self.allocator
    }
}

impl std::fmt::Debug for CompiledCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCommandList")
            .field("id", &self.list.id)
            .field("list_type", &self.list_type)
            .field("allocator", &self.allocator.native_id())
            .finish()
    }
}

/// The shader-visible descriptor allocators a list binds as its heaps.
#[derive(Debug, Clone)]
pub struct ShaderVisibleHeaps {
    pub cbv_srv_uav: Arc<DescriptorAllocator>,
    pub sampler: Arc<DescriptorAllocator>,
}

impl ShaderVisibleHeaps {
    /// Allocator for a shader-visible heap type.
    pub fn for_type(&self, heap_type: DescriptorHeapType) -> GraphicsResult<&Arc<DescriptorAllocator>> {
        match heap_type {
            DescriptorHeapType::CbvSrvUav => Ok(&self.cbv_srv_uav),
            DescriptorHeapType::Sampler => Ok(&self.sampler),
            other => Err(GraphicsError::InvalidParameter(format!(
                "{other:?} descriptors cannot be bound to shaders"
            ))),
        }
    }
}

/// Records GPU commands against one command allocator.
///
/// A list starts in the recording state. [`close`](Self::close) produces a
/// [`CompiledCommandList`]; recording into a closed list fails with
/// [`GraphicsError::CommandListClosed`] until the list is reset.
pub struct CommandList {
    backend: Arc<dyn GpuBackend>,
    list: Arc<NativeCommandList>,
    list_type: CommandListType,
    allocator: Arc<CommandAllocator>,
    heaps: ShaderVisibleHeaps,
    compiled: Option<CompiledCommandList>,
    label: Option<String>,
}

impl CommandList {
    /// Create a list recording into `allocator`, bound to the device's
    /// shader-visible heaps.
    pub fn new(
        device: &GraphicsDevice,
        list_type: CommandListType,
        allocator: Arc<CommandAllocator>,
        pipeline: Option<&PipelineState>,
    ) -> GraphicsResult<Self> {
        Self::with_parts(
            device.backend().clone(),
            list_type,
            allocator,
            device.shader_visible_heaps(),
            pipeline,
        )
    }

    pub(crate) fn with_parts(
        backend: Arc<dyn GpuBackend>,
        list_type: CommandListType,
        allocator: Arc<CommandAllocator>,
        heaps: ShaderVisibleHeaps,
        pipeline: Option<&PipelineState>,
    ) -> GraphicsResult<Self> {
        if allocator.list_type() != list_type {
            return Err(GraphicsError::InvalidParameter(format!(
                "{list_type:?} command list needs a {list_type:?} allocator, got {:?}",
                allocator.list_type()
            )));
        }
        let id = backend.create_command_list(
            list_type,
            allocator.native_id(),
            pipeline.map(PipelineState::native_id),
        )?;
        log::debug!("Created {list_type:?} command list {id:?}");

        let mut list = Self {
            list: Arc::new(NativeCommandList {
                backend: backend.clone(),
                id,
            }),
            backend,
            list_type,
            allocator,
            heaps,
            compiled: None,
            label: None,
        };
        list.bind_descriptor_heaps()?;
        Ok(list)
    }

    /// Set the debug label used in log messages.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Get the native list id.
    pub fn native_id(&self) -> ListId {
        self.list.id
    }

    /// Label for log messages, `"command list"` when none was set.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or("command list")
    }

    /// Type of the list.
    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    /// The allocator currently backing the list.
    pub fn allocator(&self) -> &Arc<CommandAllocator> {
        &self.allocator
    }

    /// Whether the list has been closed.
    pub fn is_closed(&self) -> bool {
        self.compiled.is_some()
    }

    fn bind_descriptor_heaps(&mut self) -> GraphicsResult<()> {
        if matches!(self.list_type, CommandListType::Direct | CommandListType::Compute) {
            let heaps = vec![
                self.heaps.cbv_srv_uav.heap_id(),
                self.heaps.sampler.heap_id(),
            ];
            self.record(Command::SetDescriptorHeaps(heaps))?;
        }
        Ok(())
    }

    fn record(&mut self, command: Command) -> GraphicsResult<()> {
        if self.is_closed() {
            return Err(GraphicsError::CommandListClosed);
        }
        log::trace!("{}: {}", self.display_label(), command.name());
        self.backend.record(self.list.id, command)
    }

    fn ensure_open(&self) -> GraphicsResult<()> {
        if self.is_closed() {
            Err(GraphicsError::CommandListClosed)
        } else {
            Ok(())
        }
    }

    // ---- lifecycle ----

    /// Finish recording.
    ///
    /// Closing an already closed list logs a warning and returns the
    /// existing compiled form.
    pub fn close(&mut self) -> GraphicsResult<CompiledCommandList> {
        if let Some(compiled) = &self.compiled {
            log::warn!("{} is already closed", self.display_label());
            return Ok(compiled.clone());
        }
        self.backend.close_command_list(self.list.id)?;
        let compiled = CompiledCommandList {
            list: self.list.clone(),
            allocator: self.allocator.clone(),
            list_type: self.list_type,
        };
        self.compiled = Some(compiled.clone());
        Ok(compiled)
    }

    /// Reset the backing allocator and reopen the list.
    ///
    /// Fails if the GPU still executes commands from the allocator.
    pub fn reset(&mut self) -> GraphicsResult<()> {
        self.allocator.reset()?;
        let allocator = self.allocator.clone();
        self.reopen(allocator, None)
    }

    /// Reopen the list against another allocator, which the caller has
    /// already reset.
    pub fn reset_with(
        &mut self,
        allocator: Arc<CommandAllocator>,
        pipeline: Option<&PipelineState>,
    ) -> GraphicsResult<()> {
        if allocator.list_type() != self.list_type {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} command list reset with a {:?} allocator",
                self.list_type,
                allocator.list_type()
            )));
        }
        self.reopen(allocator, pipeline)
    }

    fn reopen(
        &mut self,
        allocator: Arc<CommandAllocator>,
        pipeline: Option<&PipelineState>,
    ) -> GraphicsResult<()> {
        if !self.is_closed() {
            log::debug!(
                "{} reset while recording; closing it first",
                self.display_label()
            );
            self.backend.close_command_list(self.list.id)?;
        }
        self.backend.reset_command_list(
            self.list.id,
            allocator.native_id(),
            pipeline.map(PipelineState::native_id),
        )?;
        self.allocator = allocator;
        self.compiled = None;
        self.bind_descriptor_heaps()
    }

    // ---- barriers ----

    /// Record a state transition of `resource`.
    ///
    /// `before` must equal the state tracked on the resource; otherwise this
    /// fails with [`GraphicsError::InvalidResourceState`] and records nothing.
    pub fn resource_barrier_transition(
        &mut self,
        resource: &GraphicsResource,
        before: ResourceStates,
        after: ResourceStates,
    ) -> GraphicsResult<()> {
        self.ensure_open()?;
        let actual = resource.current_state();
        if actual != before {
            return Err(GraphicsError::InvalidResourceState {
                resource: resource
                    .label()
                    .map_or_else(|| format!("{:?}", resource.native_id()), str::to_string),
                expected: before,
                actual,
            });
        }
        self.record(Command::ResourceBarrier(vec![ResourceBarrier::Transition {
            resource: resource.native_id(),
            before,
            after,
        }]))?;
        resource.set_state(after);
        Ok(())
    }

    /// Transition `resource` from its tracked state to `after`.
    ///
    /// Records nothing if the resource is already in `after`.
    pub fn transition(&mut self, resource: &GraphicsResource, after: ResourceStates) -> GraphicsResult<()> {
        let before = resource.current_state();
        if before == after {
            self.ensure_open()?;
            log::trace!(
                "{} already in {after:?}",
                resource.label().unwrap_or("resource")
            );
            return Ok(());
        }
        self.resource_barrier_transition(resource, before, after)
    }

    /// Order unordered-access work on `resource`.
    pub fn resource_barrier_uav(&mut self, resource: &GraphicsResource) -> GraphicsResult<()> {
        self.record(Command::ResourceBarrier(vec![ResourceBarrier::Uav {
            resource: resource.native_id(),
        }]))
    }

    // ---- pipeline and bindings ----

    /// Bind a pipeline state.
    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) -> GraphicsResult<()> {
        self.record(Command::SetPipelineState(pipeline.native_id()))
    }

    /// Bind the root signature for draws.
    pub fn set_graphics_root_signature(&mut self, root_signature: &RootSignature) -> GraphicsResult<()> {
        self.record(Command::SetGraphicsRootSignature(root_signature.native_id()))
    }

    /// Bind the root signature for dispatches.
    pub fn set_compute_root_signature(&mut self, root_signature: &RootSignature) -> GraphicsResult<()> {
        self.record(Command::SetComputeRootSignature(root_signature.native_id()))
    }

    /// Copy a descriptor set into the shader-visible heap and bind it to
    /// root parameter `index` for draws.
    pub fn set_graphics_root_descriptor_table(
        &mut self,
        index: u32,
        set: &DescriptorSet,
    ) -> GraphicsResult<()> {
        let base = self.stage_descriptor_set(set)?;
        self.record(Command::SetGraphicsRootDescriptorTable { index, base })
    }

    /// Copy a descriptor set into the shader-visible heap and bind it to
    /// root parameter `index` for dispatches.
    pub fn set_compute_root_descriptor_table(
        &mut self,
        index: u32,
        set: &DescriptorSet,
    ) -> GraphicsResult<()> {
        let base = self.stage_descriptor_set(set)?;
        self.record(Command::SetComputeRootDescriptorTable { index, base })
    }

    fn stage_descriptor_set(&self, set: &DescriptorSet) -> GraphicsResult<GpuDescriptorHandle> {
        self.ensure_open()?;
        if set.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "cannot bind an empty descriptor set".into(),
            ));
        }
        let allocator = self.heaps.for_type(set.heap_type())?;
        let dest = allocator.allocate(set.len())?;
        self.backend
            .copy_descriptors(dest, &set.handles(), set.heap_type())?;
        allocator.gpu_handle(dest)
    }

    /// Bind a constant buffer address to root parameter `index`.
    pub fn set_graphics_root_constant_buffer_view(
        &mut self,
        index: u32,
        buffer_location: u64,
    ) -> GraphicsResult<()> {
        self.record(Command::SetGraphicsRootConstantBufferView {
            index,
            buffer_location,
        })
    }

    /// Set inline root constants for draws.
    pub fn set_graphics_root_32bit_constants(
        &mut self,
        index: u32,
        values: &[u32],
        dest_offset: u32,
    ) -> GraphicsResult<()> {
        self.record(Command::SetGraphicsRoot32BitConstants {
            index,
            values: values.to_vec(),
            dest_offset,
        })
    }

    /// Set inline root constants for dispatches.
    pub fn set_compute_root_32bit_constants(
        &mut self,
        index: u32,
        values: &[u32],
        dest_offset: u32,
    ) -> GraphicsResult<()> {
        self.record(Command::SetComputeRoot32BitConstants {
            index,
            values: values.to_vec(),
            dest_offset,
        })
    }

    // ---- fixed function ----

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) -> GraphicsResult<()> {
        self.record(Command::SetPrimitiveTopology(topology))
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> GraphicsResult<()> {
        self.set_viewports(&[viewport])
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) -> GraphicsResult<()> {
        self.record(Command::SetViewports(viewports.to_vec()))
    }

    pub fn set_scissor_rect(&mut self, rect: Rect) -> GraphicsResult<()> {
        self.set_scissor_rects(&[rect])
    }

    pub fn set_scissor_rects(&mut self, rects: &[Rect]) -> GraphicsResult<()> {
        self.record(Command::SetScissorRects(rects.to_vec()))
    }

    pub fn set_vertex_buffers(
        &mut self,
        start_slot: u32,
        views: &[VertexBufferView],
    ) -> GraphicsResult<()> {
        self.record(Command::SetVertexBuffers {
            start_slot,
            views: views.to_vec(),
        })
    }

    pub fn set_index_buffer(&mut self, view: Option<IndexBufferView>) -> GraphicsResult<()> {
        self.record(Command::SetIndexBuffer(view))
    }

    /// Bind render targets and an optional depth-stencil target.
    pub fn set_render_targets(
        &mut self,
        render_targets: &[&RenderTargetView],
        depth_stencil: Option<&DepthStencilView>,
    ) -> GraphicsResult<()> {
        self.record(Command::SetRenderTargets {
            render_targets: render_targets.iter().map(|rtv| rtv.cpu_handle()).collect(),
            depth_stencil: depth_stencil.map(|dsv| dsv.cpu_handle()),
        })
    }

    pub fn clear_render_target_view(
        &mut self,
        view: &RenderTargetView,
        color: [f32; 4],
    ) -> GraphicsResult<()> {
        self.record(Command::ClearRenderTargetView {
            view: view.cpu_handle(),
            color,
        })
    }

    pub fn clear_depth_stencil_view(
        &mut self,
        view: &DepthStencilView,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) -> GraphicsResult<()> {
        self.record(Command::ClearDepthStencilView {
            view: view.cpu_handle(),
            flags,
            depth,
            stencil,
        })
    }

    // ---- work ----

    pub fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) -> GraphicsResult<()> {
        self.record(Command::DrawInstanced {
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        })
    }

    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> GraphicsResult<()> {
        self.record(Command::DrawIndexedInstanced {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        })
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> GraphicsResult<()> {
        self.record(Command::Dispatch { x, y, z })
    }

    /// Copy `size` bytes between buffers.
    pub fn copy_buffer_region(
        &mut self,
        dst: &GraphicsResource,
        dst_offset: u64,
        src: &GraphicsResource,
        src_offset: u64,
        size: u64,
    ) -> GraphicsResult<()> {
        self.record(Command::CopyBufferRegion {
            dst: dst.native_id(),
            dst_offset,
            src: src.native_id(),
            src_offset,
            size,
        })
    }

    /// Copy a whole resource into another of the same size.
    pub fn copy_resource(&mut self, dst: &GraphicsResource, src: &GraphicsResource) -> GraphicsResult<()> {
        self.record(Command::CopyResource {
            dst: dst.native_id(),
            src: src.native_id(),
        })
    }

    /// Copy rows of a buffer into the top mip of a texture.
    pub fn copy_texture_region(
        &mut self,
        dst: &GraphicsResource,
        src: &GraphicsResource,
        src_offset: u64,
        src_row_pitch: u64,
    ) -> GraphicsResult<()> {
        self.record(Command::CopyTextureRegion {
            dst: dst.native_id(),
            src: src.native_id(),
            src_offset,
            src_row_pitch,
        })
    }

    /// Inline a closed bundle.
    ///
    /// Lists that were not created as [`CommandListType::Bundle`] are
    /// ignored.
    pub fn execute_bundle(&mut self, bundle: &CompiledCommandList) -> GraphicsResult<()> {
        if bundle.list_type() != CommandListType::Bundle {
            self.ensure_open()?;
            log::debug!(
                "execute_bundle ignored: {:?} is a {:?} list",
                bundle.native_id(),
                bundle.list_type()
            );
            return Ok(());
        }
        self.record(Command::ExecuteBundle(bundle.native_id()))
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("id", &self.list.id)
            .field("label", &self.label)
            .field("list_type", &self.list_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandList: Send);
static_assertions::assert_impl_all!(CompiledCommandList: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::types::{ResourceDescriptor, HeapType};

    fn setup() -> (Arc<GraphicsDevice>, CommandList) {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        let allocator = device
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let list = device
            .create_command_list(CommandListType::Direct, allocator, None)
            .unwrap()
            .with_label("test");
        (device, list)
    }

    #[test]
    fn test_display_label() {
        let (device, list) = setup();
        assert_eq!(list.display_label(), "test");

        let allocator = device
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let unnamed = device
            .create_command_list(CommandListType::Direct, allocator, None)
            .unwrap();
        assert_eq!(unnamed.display_label(), "command list");
    }

    #[test]
    fn test_double_close_returns_same_list() {
        let (_device, mut list) = setup();
        let first = list.close().unwrap();
        let second = list.close().unwrap();
        assert_eq!(first.native_id(), second.native_id());
        assert!(Arc::ptr_eq(first.allocator(), second.allocator()));
    }

    #[test]
    fn test_record_after_close_fails() {
        let (_device, mut list) = setup();
        list.close().unwrap();
        assert_eq!(
            list.set_primitive_topology(PrimitiveTopology::TriangleList),
            Err(GraphicsError::CommandListClosed)
        );
        list.reset().unwrap();
        assert!(list.set_primitive_topology(PrimitiveTopology::TriangleList).is_ok());
    }

    #[test]
    fn test_barrier_state_mismatch() {
        let (device, mut list) = setup();
        let buffer = device
            .create_resource(
                &ResourceDescriptor::buffer(256).with_label("vb"),
                HeapType::Default,
                ResourceStates::COPY_DEST,
            )
            .unwrap();

        let err = list
            .resource_barrier_transition(
                &buffer,
                ResourceStates::COMMON,
                ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
            )
            .unwrap_err();
        assert_eq!(
            err,
            GraphicsError::InvalidResourceState {
                resource: "vb".into(),
                expected: ResourceStates::COMMON,
                actual: ResourceStates::COPY_DEST,
            }
        );
        assert_eq!(buffer.current_state(), ResourceStates::COPY_DEST);

        list.resource_barrier_transition(
            &buffer,
            ResourceStates::COPY_DEST,
            ResourceStates::VERTEX_AND_CONSTANT_BUFFER,
        )
        .unwrap();
        assert_eq!(
            buffer.current_state(),
            ResourceStates::VERTEX_AND_CONSTANT_BUFFER
        );
    }

    #[test]
    fn test_transition_to_current_state_is_noop() {
        let (device, mut list) = setup();
        let buffer = device
            .create_buffer(256, HeapType::Default, Some("noop"))
            .unwrap();
        list.transition(&buffer, ResourceStates::COMMON).unwrap();
        assert_eq!(buffer.current_state(), ResourceStates::COMMON);
    }

    #[test]
    fn test_execute_non_bundle_is_noop() {
        let (device, mut list) = setup();
        let other_allocator = device
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let mut other = device
            .create_command_list(CommandListType::Direct, other_allocator, None)
            .unwrap();
        let compiled = other.close().unwrap();
        assert!(list.execute_bundle(&compiled).is_ok());
    }

    #[test]
    fn test_allocator_type_mismatch() {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        let allocator = device
            .create_command_allocator(CommandListType::Copy)
            .unwrap();
        assert!(matches!(
            device.create_command_list(CommandListType::Direct, allocator, None),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
