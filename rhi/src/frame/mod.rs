//! Frame pacing: per-slot resources and the ring that cycles them.

mod resource;
mod ring;

pub use resource::FrameResource;
pub use ring::FrameRing;
