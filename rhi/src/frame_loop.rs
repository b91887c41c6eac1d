//! The per-tick driver: update, record, submit, present, signal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::command::{CommandList, CompiledCommandList};
use crate::config::FrameLoopConfig;
use crate::device::GraphicsDevice;
use crate::error::GraphicsResult;
use crate::frame::FrameRing;
use crate::pipeline::PipelineState;
use crate::presenter::{GraphicsPresenter, SwapChainPresenter};
use crate::profiling::{profile_plot, profile_scope};
use crate::resources::UploadRing;
use crate::types::{CommandListType, QueueType};

/// Timing of the frame being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTime {
    /// Time since the previous tick.
    pub delta: Duration,
    /// Sum of all deltas so far, including ticks that failed.
    pub total: Duration,
    /// Zero-based index of this frame among the frames the ring started.
    ///
    /// A frame that fails after recording began still consumes its index,
    /// so indices of presented frames can have gaps.
    pub frame_index: u64,
}

/// What a handler records into during [`FrameHandler::render`].
///
/// The back buffer is already a bound render target when `render` runs.
pub struct RenderContext<'a> {
    pub list: &'a mut CommandList,
    /// The slot's prerecorded bundle, if one was set up.
    pub bundle: Option<&'a CompiledCommandList>,
    /// Per-frame upload memory, free to overwrite.
    pub upload: &'a mut UploadRing,
    pub presenter: &'a dyn GraphicsPresenter,
    pub time: FrameTime,
}

/// Application callbacks driven by [`FrameLoop::tick`].
pub trait FrameHandler {
    /// Advance simulation state.
    fn update(&mut self, time: &FrameTime) -> GraphicsResult<()>;

    /// Record the frame's commands.
    fn render(&mut self, ctx: &mut RenderContext<'_>) -> GraphicsResult<()>;
}

/// Result of one [`FrameLoop::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The frame was submitted and presented.
    Presented { frame_index: u64, fence_value: u64 },
    /// Another tick was still running, nothing happened.
    Skipped,
}

struct LoopState<P> {
    ring: FrameRing,
    presenter: P,
    list: CommandList,
    pipeline: Option<Arc<PipelineState>>,
    total: Duration,
}

/// Drives a [`FrameRing`] and a presenter one tick at a time.
///
/// Each tick runs `update`, waits for the next frame slot, records the frame
/// between the presenter's `begin_draw` and `end_draw`, submits it, presents
/// and signals the slot. The slot is signaled even when presenting fails, so
/// its fence always covers the submitted work.
///
/// A tick that starts while another is running (for example when the host
/// re-enters from a callback) is skipped instead of blocking.
pub struct FrameLoop<P: GraphicsPresenter = SwapChainPresenter> {
    state: Mutex<LoopState<P>>,
}

impl<P: GraphicsPresenter> FrameLoop<P> {
    /// Create a loop on the device's direct queue.
    pub fn new(device: &Arc<GraphicsDevice>, presenter: P, config: &FrameLoopConfig) -> GraphicsResult<Self> {
        let ring = FrameRing::new(device, QueueType::Direct, config)?;
        let mut list = device
            .create_command_list(CommandListType::Direct, ring.current().allocator().clone(), None)?
            .with_label("frame list");
        list.close()?;
        Ok(Self {
            state: Mutex::new(LoopState {
                ring,
                presenter,
                list,
                pipeline: None,
                total: Duration::ZERO,
            }),
        })
    }

    /// Set the pipeline every frame list starts with.
    pub fn with_pipeline(self, pipeline: Arc<PipelineState>) -> Self {
        self.state.lock().pipeline = Some(pipeline);
        self
    }

    /// Record a bundle into every frame slot.
    pub fn init_bundles(
        &self,
        mut record: impl FnMut(&mut CommandList) -> GraphicsResult<()>,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let LoopState { ring, pipeline, .. } = &mut *state;
        let device = ring.device().clone();
        for frame in ring.frames_mut() {
            frame.init_bundle(&device, pipeline.as_deref(), &mut record)?;
        }
        Ok(())
    }

    /// Produce one frame.
    pub fn tick(&self, handler: &mut impl FrameHandler, delta: Duration) -> GraphicsResult<TickOutcome> {
        let Some(mut state) = self.state.try_lock() else {
            log::warn!("Tick requested while a frame is in progress, skipping");
            return Ok(TickOutcome::Skipped);
        };
        profile_scope!("tick");

        state.total += delta;
        let time = FrameTime {
            delta,
            total: state.total,
            frame_index: state.ring.frame_count(),
        };
        handler.update(&time)?;

        let LoopState {
            ring,
            presenter,
            list,
            pipeline,
            ..
        } = &mut *state;

        let frame = ring.begin_frame()?;
        let compiled = frame.populate_command_list(list, pipeline.as_deref(), |list, bundle, upload| {
            presenter.begin_draw(list)?;
            let mut ctx = RenderContext {
                list,
                bundle,
                upload,
                presenter: &*presenter,
                time,
            };
            let rendered = handler.render(&mut ctx);
            presenter.end_draw(ctx.list)?;
            rendered
        })?;
        ring.queue().execute_command_list(&compiled)?;

        let presented = presenter.present();
        let fence_value = ring.end_frame()?;
        profile_plot!("frame_fence_value", fence_value);
        presented?;

        Ok(TickOutcome::Presented {
            frame_index: time.frame_index,
            fence_value,
        })
    }

    /// Number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.state.lock().ring.frame_count()
    }

    /// Block until all submitted frames are complete.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.state.lock().ring.wait_idle()
    }

    /// Wait for the GPU and resize the presenter.
    pub fn resize(&self, width: u32, height: u32) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.ring.wait_idle()?;
        state.presenter.resize(width, height)
    }

    /// Run `f` on the presenter, or return `None` while a tick is running.
    pub fn with_presenter<R>(&self, f: impl FnOnce(&mut P) -> R) -> Option<R> {
        self.state.try_lock().map(|mut state| f(&mut state.presenter))
    }
}

impl<P: GraphicsPresenter> std::fmt::Debug for FrameLoop<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("FrameLoop");
        match self.state.try_lock() {
            Some(state) => s.field("ring", &state.ring),
            None => s.field("ring", &"<ticking>"),
        };
        s.finish()
    }
}

static_assertions::assert_impl_all!(FrameLoop: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, PresentationParameters};
    use crate::error::{GraphicsError, PresentError};

    #[derive(Default)]
    struct CountingHandler {
        updates: u32,
        renders: u32,
    }

    impl FrameHandler for CountingHandler {
        fn update(&mut self, _time: &FrameTime) -> GraphicsResult<()> {
            self.updates += 1;
            Ok(())
        }

        fn render(&mut self, ctx: &mut RenderContext<'_>) -> GraphicsResult<()> {
            self.renders += 1;
            ctx.list
                .clear_render_target_view(ctx.presenter.render_target_view()?, [0.0; 4])?;
            ctx.upload.write_pod(&[ctx.time.frame_index as u32])?;
            Ok(())
        }
    }

    fn frame_loop() -> (Arc<GraphicsDevice>, FrameLoop) {
        let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
        let presenter = SwapChainPresenter::new(&device, PresentationParameters::new(32, 32)).unwrap();
        let frame_loop = FrameLoop::new(&device, presenter, &FrameLoopConfig::default()).unwrap();
        (device, frame_loop)
    }

    #[test]
    fn test_tick_presents_and_signals() {
        let (device, frame_loop) = frame_loop();
        let mut handler = CountingHandler::default();
        for i in 0..5u64 {
            let outcome = frame_loop
                .tick(&mut handler, Duration::from_millis(16))
                .unwrap();
            assert_eq!(
                outcome,
                TickOutcome::Presented {
                    frame_index: i,
                    fence_value: i + 1
                }
            );
        }
        assert_eq!(handler.updates, 5);
        assert_eq!(handler.renders, 5);
        assert_eq!(frame_loop.frame_count(), 5);
        assert_eq!(frame_loop.with_presenter(|p| p.present_count()), Some(5));
        assert_eq!(device.dummy_backend().unwrap().stats().presents, 5);
    }

    #[test]
    fn test_present_failure_still_signals() {
        let (device, frame_loop) = frame_loop();
        let mut handler = CountingHandler::default();
        device
            .dummy_backend()
            .unwrap()
            .inject_present_error(PresentError::Other("occluded".into()));
        let err = frame_loop
            .tick(&mut handler, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Present(PresentError::Other(_))));
        assert_eq!(device.queue(QueueType::Direct).last_signaled_value(), 1);

        assert!(matches!(
            frame_loop.tick(&mut handler, Duration::ZERO).unwrap(),
            TickOutcome::Presented { fence_value: 2, .. }
        ));
    }

    struct FailFirstRender {
        inner: CountingHandler,
        failed: bool,
    }

    impl FrameHandler for FailFirstRender {
        fn update(&mut self, time: &FrameTime) -> GraphicsResult<()> {
            self.inner.update(time)
        }

        fn render(&mut self, ctx: &mut RenderContext<'_>) -> GraphicsResult<()> {
            if !self.failed {
                self.failed = true;
                return Err(GraphicsError::Internal("scene not ready".into()));
            }
            self.inner.render(ctx)
        }
    }

    #[test]
    fn test_failed_render_consumes_frame_index() {
        let (_device, frame_loop) = frame_loop();
        let mut handler = FailFirstRender {
            inner: CountingHandler::default(),
            failed: false,
        };
        assert!(matches!(
            frame_loop.tick(&mut handler, Duration::from_millis(10)),
            Err(GraphicsError::Internal(_))
        ));
        assert_eq!(frame_loop.frame_count(), 1);

        assert_eq!(
            frame_loop
                .tick(&mut handler, Duration::from_millis(10))
                .unwrap(),
            TickOutcome::Presented {
                frame_index: 1,
                fence_value: 1
            }
        );
        assert_eq!(handler.inner.updates, 2);
        assert_eq!(handler.inner.renders, 1);
    }

    struct ReentrantHandler {
        frame_loop: Arc<FrameLoop>,
        inner: Option<TickOutcome>,
    }

    impl FrameHandler for ReentrantHandler {
        fn update(&mut self, _time: &FrameTime) -> GraphicsResult<()> {
            self.inner = Some(
                self.frame_loop
                    .tick(&mut CountingHandler::default(), Duration::ZERO)?,
            );
            Ok(())
        }

        fn render(&mut self, _ctx: &mut RenderContext<'_>) -> GraphicsResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reentrant_tick_is_skipped() {
        let (_device, frame_loop) = frame_loop();
        let frame_loop = Arc::new(frame_loop);
        let mut handler = ReentrantHandler {
            frame_loop: frame_loop.clone(),
            inner: None,
        };
        let outcome = frame_loop.tick(&mut handler, Duration::ZERO).unwrap();
        assert!(matches!(outcome, TickOutcome::Presented { .. }));
        assert_eq!(handler.inner, Some(TickOutcome::Skipped));
        assert_eq!(frame_loop.frame_count(), 1);
    }
}
