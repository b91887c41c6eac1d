//! Device, presentation and frame loop configuration.

use crate::backend::GpuTimeline;
use crate::descriptors::DESCRIPTORS_PER_HEAP;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::Format;

/// Maximum number of frames that can be in flight at once.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Default number of frames in flight.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Default per-frame upload ring size.
pub const DEFAULT_UPLOAD_RING_CAPACITY: u64 = 64 * 1024;

/// Configuration for creating a [`GraphicsDevice`](crate::GraphicsDevice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Debug label used in log messages.
    pub label: Option<String>,
    /// Index into the backend's adapter list.
    pub adapter_index: usize,
    /// Capacity of every descriptor allocator the device creates.
    pub descriptors_per_heap: u32,
    /// Enable native validation of API misuse.
    pub validation: bool,
    /// When the software GPU executes submitted work.
    pub timeline: GpuTimeline,
}

impl DeviceConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Select an adapter.
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set the capacity of each descriptor allocator.
    pub fn with_descriptors_per_heap(mut self, count: u32) -> Self {
        self.descriptors_per_heap = count;
        self
    }

    /// Enable or disable validation.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Set the GPU timeline of the software backend.
    pub fn with_timeline(mut self, timeline: GpuTimeline) -> Self {
        self.timeline = timeline;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> GraphicsResult<()> {
        if !(1..=DESCRIPTORS_PER_HEAP).contains(&self.descriptors_per_heap) {
            return Err(GraphicsError::out_of_range(
                "descriptors per heap",
                u64::from(self.descriptors_per_heap),
                1,
                u64::from(DESCRIPTORS_PER_HEAP),
            ));
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            label: None,
            adapter_index: 0,
            descriptors_per_heap: DESCRIPTORS_PER_HEAP,
            validation: cfg!(debug_assertions),
            timeline: GpuTimeline::Immediate,
        }
    }
}

/// Swap chain and depth buffer settings for a presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationParameters {
    /// Width of the back buffers in pixels.
    pub width: u32,
    /// Height of the back buffers in pixels.
    pub height: u32,
    pub back_buffer_format: Format,
    /// Format of the depth buffer, or `None` for no depth buffer.
    pub depth_stencil_format: Option<Format>,
    /// Number of back buffers.
    pub buffer_count: u32,
    /// Vertical blanks to wait per present; 0 presents immediately.
    pub sync_interval: u32,
}

impl PresentationParameters {
    /// Create parameters for a double-buffered, vsynced swap chain.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            back_buffer_format: Format::R8G8B8A8Unorm,
            depth_stencil_format: Some(Format::D32Float),
            buffer_count: 2,
            sync_interval: 1,
        }
    }

    /// Set the back buffer format.
    pub fn with_back_buffer_format(mut self, format: Format) -> Self {
        self.back_buffer_format = format;
        self
    }

    /// Set or remove the depth buffer.
    pub fn with_depth_stencil_format(mut self, format: Option<Format>) -> Self {
        self.depth_stencil_format = format;
        self
    }

    /// Set the number of back buffers.
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the sync interval.
    pub fn with_sync_interval(mut self, interval: u32) -> Self {
        self.sync_interval = interval;
        self
    }
}

/// Settings for a [`FrameRing`](crate::FrameRing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLoopConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Size of each frame's upload ring in bytes.
    pub upload_ring_capacity: u64,
}

impl FrameLoopConfig {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight,
            ..Self::default()
        }
    }

    /// Set the per-frame upload ring size.
    pub fn with_upload_ring_capacity(mut self, capacity: u64) -> Self {
        self.upload_ring_capacity = capacity;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> GraphicsResult<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(GraphicsError::out_of_range(
                "frames in flight",
                self.frames_in_flight as u64,
                1,
                MAX_FRAMES_IN_FLIGHT as u64,
            ));
        }
        if self.upload_ring_capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "upload ring capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            upload_ring_capacity: DEFAULT_UPLOAD_RING_CAPACITY,
        }
    }
}
