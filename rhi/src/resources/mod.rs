//! GPU resources and the views that describe them to shaders.

mod resource;
mod sampler;
mod upload_ring;
mod view;

pub(crate) use resource::align_up;
pub use resource::{CONSTANT_BUFFER_ALIGNMENT, GraphicsResource};
pub use sampler::Sampler;
pub use upload_ring::{UploadAllocation, UploadRing};
pub use view::{
    ConstantBufferView, DepthStencilView, RenderTargetView, ResourceView, ShaderResourceView,
    UnorderedAccessView,
};
