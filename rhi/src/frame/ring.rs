//! Ring of frame slots for keeping several frames in flight.
//!
//! [`FrameRing`] lets the CPU record frame N+1 while the GPU executes frame
//! N. Each slot owns a [`FrameResource`]; before a slot is reused the CPU
//! blocks until the GPU reached the fence value stored for it.
//!
//! # Frame Overlap
//!
//! With 2 frames in flight:
//!
//! ```text
//! Frame 0: [CPU record] [submit, signal 1] ──────────────────────────────►
//!                                  [GPU execute frame 0] ────────────────►
//!
//! Frame 1:              [CPU record] [submit, signal 2] ─────────────────►
//!                                               [GPU execute frame 1] ───►
//!
//! Frame 2:                          [wait 1] [CPU record] [submit, signal 3]
//!
//! Time ──────────────────────────────────────────────────────────────────►
//! ```
//!
//! The allocator of a slot is only reset after its wait, so commands the
//! GPU still reads are never overwritten.
//!
//! # Graceful Shutdown
//!
//! Call [`FrameRing::wait_idle`] before destroying resources the frames
//! reference.
//!
//! # Choosing Frames in Flight
//!
//! | Count | Behavior |
//! |-------|----------|
//! | 1 | CPU waits for GPU every frame. Simple but slow. |
//! | 2 | Good balance. CPU can work on N+1 while GPU renders N. |
//! | 3 | More overlap, higher latency. |
//!
//! # Example
//!
//! ```ignore
//! let mut ring = FrameRing::new(&device, QueueType::Direct, &FrameLoopConfig::default())?;
//!
//! loop {
//!     let frame = ring.begin_frame()?;  // May block if GPU is behind
//!     let compiled = frame.populate_command_list(&mut list, Some(&pipeline), |list, _, _| {
//!         list.draw_instanced(3, 1, 0, 0)
//!     })?;
//!     ring.queue().execute_command_list(&compiled)?;
//!     ring.end_frame()?;  // Signals and advances to the next slot
//! }
//!
//! ring.wait_idle()?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::command::CommandQueue;
use crate::config::FrameLoopConfig;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::profiling::profile_scope;
use crate::types::QueueType;

use super::FrameResource;

/// Manages N frame slots on one queue.
///
/// ```text
/// frames_in_flight = 2
///
/// Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
/// Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
/// ```
///
/// # Thread Safety
///
/// `FrameRing` is `Send` but not meant to be shared; it belongs to the
/// render thread.
pub struct FrameRing {
    device: Arc<GraphicsDevice>,
    queue_type: QueueType,
    frames: Vec<FrameResource>,
    current_slot: usize,
    frame_count: u64,
}

impl FrameRing {
    /// Create a ring of `config.frames_in_flight` slots submitting to the
    /// queue of `queue_type`.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        queue_type: QueueType,
        config: &FrameLoopConfig,
    ) -> GraphicsResult<Self> {
        config.validate()?;
        let frames = (0..config.frames_in_flight)
            .map(|index| {
                FrameResource::new(
                    device,
                    index,
                    queue_type.list_type(),
                    config.upload_ring_capacity,
                )
            })
            .collect::<GraphicsResult<Vec<_>>>()?;
        log::debug!(
            "Created frame ring: {} frames in flight on the {queue_type:?} queue",
            frames.len()
        );
        Ok(Self {
            device: device.clone(),
            queue_type,
            frames,
            current_slot: 0,
            frame_count: 0,
        })
    }

    /// Get the device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// The queue frames are submitted to.
    pub fn queue(&self) -> &CommandQueue {
        self.device.queue(self.queue_type)
    }

    /// Begin a new frame.
    ///
    /// Blocks until the GPU finished the work previously submitted from the
    /// current slot, then resets the slot's upload ring.
    pub fn begin_frame(&mut self) -> GraphicsResult<&mut FrameResource> {
        {
            profile_scope!("frame_ring_wait");
            let queue = self.device.queue(self.queue_type);
            self.frames[self.current_slot].wait_for_signal(queue)?;
        }
        Ok(self.start_frame())
    }

    /// Begin a new frame, giving up after `timeout`.
    ///
    /// Returns `None` if the slot did not become free in time; the frame is
    /// then not started.
    pub fn begin_frame_timeout(&mut self, timeout: Duration) -> GraphicsResult<Option<&mut FrameResource>> {
        let queue = self.device.queue(self.queue_type);
        if !self.frames[self.current_slot].wait_for_signal_timeout(queue, timeout)? {
            log::trace!("Frame slot {} still busy after {timeout:?}", self.current_slot);
            return Ok(None);
        }
        Ok(Some(self.start_frame()))
    }

    fn start_frame(&mut self) -> &mut FrameResource {
        self.frame_count += 1;
        log::trace!(
            "Begin frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );
        let frame = &mut self.frames[self.current_slot];
        frame.reset_upload_ring();
        frame
    }

    /// End the current frame.
    ///
    /// Signals the queue, stores the value in the current slot and advances
    /// to the next slot. Call this after submitting the frame's work.
    pub fn end_frame(&mut self) -> GraphicsResult<u64> {
        let queue = self.device.queue(self.queue_type);
        let value = self.frames[self.current_slot].add_signal(queue)?;
        log::trace!(
            "End frame {} (slot {}, fence {value})",
            self.frame_count,
            self.current_slot
        );
        self.current_slot = (self.current_slot + 1) % self.frames.len();
        Ok(value)
    }

    /// The slot of the frame being recorded.
    pub fn current(&self) -> &FrameResource {
        &self.frames[self.current_slot]
    }

    pub fn current_mut(&mut self) -> &mut FrameResource {
        &mut self.frames[self.current_slot]
    }

    /// Get a slot by index.
    pub fn frame(&self, slot: usize) -> Option<&FrameResource> {
        self.frames.get(slot)
    }

    /// All slots, e.g. to record one bundle per slot.
    pub fn frames_mut(&mut self) -> std::slice::IterMut<'_, FrameResource> {
        self.frames.iter_mut()
    }

    /// Block until every slot's work is complete.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        log::trace!("Waiting for GPU idle ({} slots)", self.frames.len());
        let queue = self.queue();
        for frame in &self.frames {
            frame.wait_for_signal(queue)?;
        }
        Ok(())
    }

    /// Like [`wait_idle`](Self::wait_idle), with `timeout` as the total
    /// budget across all slots. Returns `true` if the GPU is idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> GraphicsResult<bool> {
        let start = Instant::now();
        let queue = self.queue();
        for frame in &self.frames {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            if !frame.wait_for_signal_timeout(queue, timeout - elapsed)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether a slot's work is complete, without blocking.
    pub fn is_slot_ready(&self, slot: usize) -> GraphicsResult<bool> {
        let frame = self.frames.get(slot).ok_or_else(|| {
            GraphicsError::out_of_range("frame slot", slot as u64, 0, self.frames.len() as u64 - 1)
        })?;
        frame.is_ready(self.queue())
    }

    /// Whether [`wait_idle`](Self::wait_idle) would return immediately.
    pub fn is_idle(&self) -> GraphicsResult<bool> {
        let queue = self.queue();
        for frame in &self.frames {
            if !frame.is_ready(queue)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Index of the current slot, in `0..frames_in_flight`.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("queue_type", &self.queue_type)
            .field("frames", &self.frames)
            .field("current_slot", &self.current_slot)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

static_assertions::assert_impl_all!(FrameRing: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn ring(frames_in_flight: usize) -> FrameRing {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        FrameRing::new(
            &device,
            QueueType::Direct,
            &FrameLoopConfig::new(frames_in_flight).with_upload_ring_capacity(1024),
        )
        .unwrap()
    }

    #[test]
    fn test_new() {
        let ring = ring(2);
        assert_eq!(ring.frames_in_flight(), 2);
        assert_eq!(ring.current_slot(), 0);
        assert_eq!(ring.frame_count(), 0);
        assert!(ring.is_idle().unwrap());
    }

    #[test]
    fn test_zero_frames_rejected() {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        let err = FrameRing::new(&device, QueueType::Direct, &FrameLoopConfig::new(0)).unwrap_err();
        assert!(matches!(err, GraphicsError::OutOfRange { .. }));
    }

    #[test]
    fn test_end_frame_advances_slot() {
        let mut ring = ring(3);
        for expected in [1, 2, 0] {
            ring.begin_frame().unwrap();
            ring.end_frame().unwrap();
            assert_eq!(ring.current_slot(), expected);
        }
        assert_eq!(ring.frame_count(), 3);
        assert_eq!(ring.frame(0).unwrap().fence_value(), 1);
        assert_eq!(ring.frame(2).unwrap().fence_value(), 3);
    }

    #[test]
    fn test_begin_frame_resets_upload_ring() {
        let mut ring = ring(1);
        ring.begin_frame().unwrap().upload_ring().allocate(64).unwrap();
        ring.end_frame().unwrap();
        let frame = ring.begin_frame().unwrap();
        assert_eq!(frame.upload_ring().used(), 0);
        assert_eq!(frame.upload_ring().reset_count(), 1);
    }

    #[test]
    fn test_begin_frame_timeout_ready() {
        let mut ring = ring(2);
        assert!(ring.begin_frame_timeout(Duration::from_millis(1)).unwrap().is_some());
        assert_eq!(ring.frame_count(), 1);
        assert!(ring.wait_idle_timeout(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_is_slot_ready_invalid() {
        let ring = ring(2);
        assert!(ring.is_slot_ready(5).is_err());
        assert!(ring.is_slot_ready(1).unwrap());
    }
}
