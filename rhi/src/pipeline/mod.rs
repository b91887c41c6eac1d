//! Root signatures, shader bytecode and pipeline state objects.
//!
//! Pipelines are compiled once from externally produced bytecode and shared
//! across frames behind an `Arc`.

mod root_signature;
mod shader;
mod state;

pub use root_signature::{
    DescriptorRange, DescriptorRangeType, MAX_ROOT_SIGNATURE_DWORDS, RootParameter, RootSignature,
    RootSignatureDescriptor, RootSignatureFlags, ShaderVisibility, StaticSampler,
};
pub use shader::{ShaderBytecode, ShaderStage};
pub use state::{
    BlendState, ComputePipelineDescriptor, CullMode, DepthStencilState, FillMode,
    GraphicsPipelineDescriptor, InputElement, MAX_RENDER_TARGETS, PipelineKind, PipelineState,
    RasterizerState,
};
