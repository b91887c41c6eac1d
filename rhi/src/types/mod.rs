//! Common types and descriptors for native objects.
//!
//! This module contains format enums, state and usage flags, and the
//! descriptor structs passed across the native driver seam.

mod command;
mod format;
mod heap;
mod resource;
mod view;

pub use command::{
    ClearFlags, CommandListType, IndexBufferView, PrimitiveTopology, QueueType, Rect,
    VertexBufferView, Viewport,
};
pub use format::Format;
pub use heap::{DescriptorHeapDescriptor, DescriptorHeapFlags, DescriptorHeapType, HeapType};
pub use resource::{ResourceDescriptor, ResourceDimension, ResourceFlags, ResourceStates};
pub use view::{
    AddressMode, ComparisonFunction, ConstantBufferViewDescription, DepthStencilViewDescription,
    FilterMode, RenderTargetViewDescription, SamplerDescription, ShaderResourceViewDescription,
    UnorderedAccessViewDescription, ViewDescription, ViewDimension,
};
