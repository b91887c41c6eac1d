//! # RedLilium Demos
//!
//! Demo programs showcasing the render hardware interface.
//!
//! ## Available Demos
//!
//! - `frame_ring_demo` - Headless spinning quad driven by the frame loop

pub mod spinning_quad;

pub use spinning_quad::SpinningQuad;

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
