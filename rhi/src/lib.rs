//! # RedLilium RHI
//!
//! Rendering substrate over an explicit graphics API: command submission,
//! CPU/GPU synchronization with fences, descriptor allocation and the
//! per-frame resources that keep several frames in flight.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - Composition root owning queues, descriptor allocators
//!   and an upload command list
//! - [`CommandQueue`] - Submission queue with a monotonically increasing fence
//! - [`CommandList`] / [`CompiledCommandList`] - Command recording with
//!   tracked resource states
//! - [`DescriptorAllocator`] / [`DescriptorSet`] - Descriptor heap management
//! - [`FrameRing`] / [`FrameResource`] - Frames in flight
//! - [`SwapChainPresenter`] and [`FrameLoop`] - Presentation and per-tick driving
//! - [`backend`] - The native driver seam, with a software GPU for tests
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_rhi::{DeviceConfig, FrameLoop, FrameLoopConfig, GraphicsDevice};
//! use redlilium_rhi::{PresentationParameters, SwapChainPresenter};
//!
//! let device = GraphicsDevice::new(DeviceConfig::default())?;
//! let presenter = SwapChainPresenter::new(&device, PresentationParameters::new(1280, 720))?;
//! let frame_loop = FrameLoop::new(&device, presenter, &FrameLoopConfig::default())?;
//! loop {
//!     frame_loop.tick(&mut app, delta)?;
//! }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod frame_loop;
pub mod pipeline;
pub mod presenter;
pub mod profiling;
pub mod resources;
pub mod types;

// Re-export main types for convenience
pub use backend::{DummyBackend, GpuBackend, GpuTimeline};
pub use command::{CommandAllocator, CommandList, CommandQueue, CompiledCommandList};
pub use config::{DeviceConfig, FrameLoopConfig, MAX_FRAMES_IN_FLIGHT, PresentationParameters};
pub use descriptors::{CpuDescriptorHandle, DescriptorAllocator, DescriptorSet, GpuDescriptorHandle};
pub use device::GraphicsDevice;
pub use error::{GraphicsError, GraphicsResult, PresentError};
pub use frame::{FrameResource, FrameRing};
pub use frame_loop::{FrameHandler, FrameLoop, FrameTime, RenderContext, TickOutcome};
pub use pipeline::{PipelineState, RootSignature};
pub use presenter::{GraphicsPresenter, SwapChainPresenter};
pub use resources::{
    ConstantBufferView, DepthStencilView, GraphicsResource, RenderTargetView, ResourceView,
    Sampler, ShaderResourceView, UnorderedAccessView, UploadRing,
};

/// RHI library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version. Call once at startup.
pub fn init() {
    log::info!("RedLilium RHI v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_device() {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        assert_eq!(device.backend().name(), "Dummy");
    }
}
