//! Recorded GPU commands.

use crate::descriptors::{CpuDescriptorHandle, GpuDescriptorHandle};
use crate::types::{
    ClearFlags, CommandListType, IndexBufferView, PrimitiveTopology, Rect, ResourceStates,
    VertexBufferView, Viewport,
};

use super::{HeapId, ListId, PipelineId, ResourceId, RootSignatureId};

/// A declared resource state transition or hazard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// Transition between two access states.
    Transition {
        resource: ResourceId,
        before: ResourceStates,
        after: ResourceStates,
    },
    /// Order unordered-access reads and writes of one resource.
    Uav { resource: ResourceId },
}

/// One command recorded into a native command list.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ResourceBarrier(Vec<ResourceBarrier>),
    SetDescriptorHeaps(Vec<HeapId>),
    SetGraphicsRootSignature(RootSignatureId),
    SetComputeRootSignature(RootSignatureId),
    SetPipelineState(PipelineId),
    SetGraphicsRootDescriptorTable {
        index: u32,
        base: GpuDescriptorHandle,
    },
    SetComputeRootDescriptorTable {
        index: u32,
        base: GpuDescriptorHandle,
    },
    SetGraphicsRootConstantBufferView {
        index: u32,
        buffer_location: u64,
    },
    SetGraphicsRoot32BitConstants {
        index: u32,
        values: Vec<u32>,
        dest_offset: u32,
    },
    SetComputeRoot32BitConstants {
        index: u32,
        values: Vec<u32>,
        dest_offset: u32,
    },
    SetPrimitiveTopology(PrimitiveTopology),
    SetViewports(Vec<Viewport>),
    SetScissorRects(Vec<Rect>),
    SetVertexBuffers {
        start_slot: u32,
        views: Vec<VertexBufferView>,
    },
    SetIndexBuffer(Option<IndexBufferView>),
    SetRenderTargets {
        render_targets: Vec<CpuDescriptorHandle>,
        depth_stencil: Option<CpuDescriptorHandle>,
    },
    ClearRenderTargetView {
        view: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepthStencilView {
        view: CpuDescriptorHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    DrawInstanced {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBufferRegion {
        dst: ResourceId,
        dst_offset: u64,
        src: ResourceId,
        src_offset: u64,
        size: u64,
    },
    CopyResource {
        dst: ResourceId,
        src: ResourceId,
    },
    /// Copy linear rows from a buffer into the top mip of a texture.
    CopyTextureRegion {
        dst: ResourceId,
        src: ResourceId,
        src_offset: u64,
        src_row_pitch: u64,
    },
    ExecuteBundle(ListId),
}

impl Command {
    /// Short name used in logs and validation messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResourceBarrier(_) => "ResourceBarrier",
            Self::SetDescriptorHeaps(_) => "SetDescriptorHeaps",
            Self::SetGraphicsRootSignature(_) => "SetGraphicsRootSignature",
            Self::SetComputeRootSignature(_) => "SetComputeRootSignature",
            Self::SetPipelineState(_) => "SetPipelineState",
            Self::SetGraphicsRootDescriptorTable { .. } => "SetGraphicsRootDescriptorTable",
            Self::SetComputeRootDescriptorTable { .. } => "SetComputeRootDescriptorTable",
            Self::SetGraphicsRootConstantBufferView { .. } => "SetGraphicsRootConstantBufferView",
            Self::SetGraphicsRoot32BitConstants { .. } => "SetGraphicsRoot32BitConstants",
            Self::SetComputeRoot32BitConstants { .. } => "SetComputeRoot32BitConstants",
            Self::SetPrimitiveTopology(_) => "SetPrimitiveTopology",
            Self::SetViewports(_) => "SetViewports",
            Self::SetScissorRects(_) => "SetScissorRects",
            Self::SetVertexBuffers { .. } => "SetVertexBuffers",
            Self::SetIndexBuffer(_) => "SetIndexBuffer",
            Self::SetRenderTargets { .. } => "SetRenderTargets",
            Self::ClearRenderTargetView { .. } => "ClearRenderTargetView",
            Self::ClearDepthStencilView { .. } => "ClearDepthStencilView",
            Self::DrawInstanced { .. } => "DrawInstanced",
            Self::DrawIndexedInstanced { .. } => "DrawIndexedInstanced",
            Self::Dispatch { .. } => "Dispatch",
            Self::CopyBufferRegion { .. } => "CopyBufferRegion",
            Self::CopyResource { .. } => "CopyResource",
            Self::CopyTextureRegion { .. } => "CopyTextureRegion",
            Self::ExecuteBundle(_) => "ExecuteBundle",
        }
    }

    /// Whether a list of the given type may record this command.
    pub fn is_allowed_in(&self, list_type: CommandListType) -> bool {
        match list_type {
            CommandListType::Direct => true,
            CommandListType::Bundle => !matches!(
                self,
                Self::ResourceBarrier(_)
                    | Self::SetViewports(_)
                    | Self::SetScissorRects(_)
                    | Self::SetRenderTargets { .. }
                    | Self::ClearRenderTargetView { .. }
                    | Self::ClearDepthStencilView { .. }
                    | Self::CopyBufferRegion { .. }
                    | Self::CopyResource { .. }
                    | Self::CopyTextureRegion { .. }
                    | Self::ExecuteBundle(_)
            ),
            CommandListType::Compute => matches!(
                self,
                Self::ResourceBarrier(_)
                    | Self::SetDescriptorHeaps(_)
                    | Self::SetComputeRootSignature(_)
                    | Self::SetPipelineState(_)
                    | Self::SetComputeRootDescriptorTable { .. }
                    | Self::SetComputeRoot32BitConstants { .. }
                    | Self::Dispatch { .. }
                    | Self::CopyBufferRegion { .. }
                    | Self::CopyResource { .. }
                    | Self::CopyTextureRegion { .. }
            ),
            CommandListType::Copy => matches!(
                self,
                Self::ResourceBarrier(_)
                    | Self::CopyBufferRegion { .. }
                    | Self::CopyResource { .. }
                    | Self::CopyTextureRegion { .. }
            ),
        }
    }
}
