//! Integration tests for frames in flight, presentation and the frame loop.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rstest::rstest;

use common::TestContext;
use redlilium_rhi::types::{CommandListType, QueueType};
use redlilium_rhi::{
    FrameHandler, FrameLoop, FrameLoopConfig, FrameRing, FrameTime, GpuTimeline,
    GraphicsPresenter, GraphicsResult, PresentError, RenderContext, TickOutcome,
};

// ============================================================================
// Frame Ring
// ============================================================================

#[rstest]
#[case::one(1)]
#[case::two(2)]
#[case::three(3)]
fn test_slots_cycle_and_fences_increase(#[case] frames_in_flight: usize) {
    let ctx = TestContext::new();
    let mut ring = FrameRing::new(
        &ctx.device,
        QueueType::Direct,
        &FrameLoopConfig::new(frames_in_flight),
    )
    .unwrap();

    let mut fences = Vec::new();
    for frame in 0..(frames_in_flight * 3) {
        let slot = ring.begin_frame().unwrap().index();
        assert_eq!(slot, frame % frames_in_flight);
        fences.push(ring.end_frame().unwrap());
    }

    assert!(fences.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(ring.frame_count(), (frames_in_flight * 3) as u64);
    assert!(ring.is_idle().unwrap());
}

#[rstest]
#[case(0)]
#[case(4)]
fn test_ring_rejects_bad_frame_counts(#[case] frames_in_flight: usize) {
    let ctx = TestContext::new();
    let result = FrameRing::new(
        &ctx.device,
        QueueType::Direct,
        &FrameLoopConfig::new(frames_in_flight),
    );
    assert!(result.is_err());
}

#[rstest]
#[case::two(2)]
#[case::three(3)]
fn test_cpu_runs_ahead_until_ring_is_full(#[case] frames_in_flight: usize) {
    let ctx = TestContext::deferred();
    let mut ring = FrameRing::new(
        &ctx.device,
        QueueType::Direct,
        &FrameLoopConfig::new(frames_in_flight),
    )
    .unwrap();

    // Every slot can be recorded once without the GPU doing anything.
    for _ in 0..frames_in_flight {
        ring.begin_frame().unwrap();
        ring.end_frame().unwrap();
    }
    assert!(!ring.is_slot_ready(0).unwrap());

    // The next frame reuses slot 0, which the GPU has not finished.
    let started = ring.begin_frame_timeout(Duration::from_millis(10)).unwrap();
    assert!(started.is_none());

    ctx.gpu()
        .complete_up_to(ctx.queue_id(QueueType::Direct), 1)
        .unwrap();
    assert!(ring.is_slot_ready(0).unwrap());
    assert!(!ring.is_slot_ready(1).unwrap());

    let frame = ring
        .begin_frame_timeout(Duration::from_millis(10))
        .unwrap()
        .expect("slot 0 should be free");
    assert_eq!(frame.index(), 0);
    ctx.gpu().flush().unwrap();
}

#[test]
fn test_begin_frame_blocks_on_stalled_gpu() {
    let ctx = TestContext::deferred();
    let mut ring =
        FrameRing::new(&ctx.device, QueueType::Direct, &FrameLoopConfig::new(2)).unwrap();
    for _ in 0..2 {
        ring.begin_frame().unwrap();
        ring.end_frame().unwrap();
    }

    let released = Arc::new(AtomicBool::new(false));
    let gpu = {
        let device = ctx.device.clone();
        let released = released.clone();
        let queue = ctx.queue_id(QueueType::Direct);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::Release);
            device
                .dummy_backend()
                .expect("dummy backend")
                .complete_up_to(queue, 1)
                .expect("GPU step failed");
        })
    };

    // Slot 0 holds fence 1, so this returns only after the GPU thread ran.
    let frame = ring.begin_frame().unwrap();
    assert_eq!(frame.index(), 0);
    assert!(released.load(Ordering::Acquire));
    gpu.join().unwrap();

    assert!(ctx.device.queue(QueueType::Direct).is_complete(1).unwrap());
    assert!(!ctx.device.queue(QueueType::Direct).is_complete(2).unwrap());
    ctx.gpu().flush().unwrap();
}

#[test]
fn test_upload_ring_is_reset_per_frame() {
    let ctx = TestContext::new();
    let mut ring =
        FrameRing::new(&ctx.device, QueueType::Direct, &FrameLoopConfig::new(1)).unwrap();

    let frame = ring.begin_frame().unwrap();
    frame.upload_ring().write(&[1u8; 100]).unwrap();
    assert!(frame.upload_ring().used() >= 100);
    ring.end_frame().unwrap();

    let frame = ring.begin_frame().unwrap();
    assert_eq!(frame.upload_ring().used(), 0);
    ring.end_frame().unwrap();
}

#[test]
fn test_wait_idle_timeout_with_stalled_gpu() {
    let ctx = TestContext::deferred();
    let mut ring =
        FrameRing::new(&ctx.device, QueueType::Direct, &FrameLoopConfig::new(2)).unwrap();
    ring.begin_frame().unwrap();
    ring.end_frame().unwrap();

    assert!(!ring.wait_idle_timeout(Duration::from_millis(10)).unwrap());
    ctx.gpu().flush().unwrap();
    assert!(ring.wait_idle_timeout(Duration::from_millis(10)).unwrap());
    ring.wait_idle().unwrap();
}

#[test]
fn test_compute_ring_submits_compute_lists() {
    let ctx = TestContext::new();
    let mut ring =
        FrameRing::new(&ctx.device, QueueType::Compute, &FrameLoopConfig::new(2)).unwrap();
    let allocator = ctx
        .device
        .create_command_allocator(CommandListType::Compute)
        .unwrap();
    let mut list = ctx
        .device
        .create_command_list(CommandListType::Compute, allocator, None)
        .unwrap();
    list.close().unwrap();

    for _ in 0..4 {
        let frame = ring.begin_frame().unwrap();
        let compiled = frame
            .populate_command_list(&mut list, None, |_, _, _| Ok(()))
            .unwrap();
        assert_eq!(compiled.list_type(), CommandListType::Compute);
        ring.queue().execute_command_list(&compiled).unwrap();
        ring.end_frame().unwrap();
    }
    assert_eq!(ctx.gpu().stats().lists_executed, 4);
}

// ============================================================================
// Presenter
// ============================================================================

#[test]
fn test_presenter_cycles_back_buffers() {
    let ctx = TestContext::new();
    let mut presenter = ctx.presenter(8, 8);
    let count = presenter.parameters().buffer_count;

    for i in 0..(count * 2) {
        assert_eq!(presenter.back_buffer_index().unwrap(), i % count);
        presenter.present().unwrap();
    }
    assert_eq!(presenter.present_count(), u64::from(count * 2));
}

#[test]
fn test_presenter_resize_recreates_buffers() {
    let ctx = TestContext::new();
    let mut presenter = ctx.presenter(8, 8);
    presenter.resize(16, 4).unwrap();

    assert_eq!(presenter.parameters().width, 16);
    assert_eq!(presenter.parameters().height, 4);
    assert_eq!(presenter.back_buffer().unwrap().width(), 16);
    assert_eq!(presenter.back_buffer_index().unwrap(), 0);
    assert!(presenter.resize(0, 4).is_err());
}

// ============================================================================
// Frame Loop
// ============================================================================

/// Clears the back buffer and counts calls.
#[derive(Default)]
struct ClearHandler {
    updates: u64,
    renders: u64,
    last_time: FrameTime,
}

impl FrameHandler for ClearHandler {
    fn update(&mut self, time: &FrameTime) -> GraphicsResult<()> {
        self.updates += 1;
        self.last_time = *time;
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> GraphicsResult<()> {
        self.renders += 1;
        let rtv = ctx.presenter.render_target_view()?;
        ctx.list.clear_render_target_view(rtv, [0.0, 0.0, 1.0, 1.0])?;
        Ok(())
    }
}

#[rstest]
#[case::one(1)]
#[case::two(2)]
#[case::three(3)]
fn test_frame_loop_presents_every_tick(#[case] frames_in_flight: usize) {
    let ctx = TestContext::new();
    let frame_loop = FrameLoop::new(
        &ctx.device,
        ctx.presenter(4, 4),
        &FrameLoopConfig::new(frames_in_flight),
    )
    .unwrap();
    let mut handler = ClearHandler::default();
    let delta = Duration::from_millis(16);

    for expected in 0..5u64 {
        match frame_loop.tick(&mut handler, delta).unwrap() {
            TickOutcome::Presented {
                frame_index,
                fence_value,
            } => {
                assert_eq!(frame_index, expected);
                assert!(fence_value > expected);
            }
            TickOutcome::Skipped => panic!("tick should not be skipped"),
        }
    }

    assert_eq!(handler.updates, 5);
    assert_eq!(handler.renders, 5);
    assert_eq!(handler.last_time.total, delta * 5);
    assert_eq!(frame_loop.frame_count(), 5);
    assert_eq!(frame_loop.with_presenter(|p| p.present_count()), Some(5));

    frame_loop.wait_idle().unwrap();
    let back_buffer = frame_loop
        .with_presenter(|p| p.back_buffers()[0].native_id())
        .unwrap();
    let bytes = ctx.gpu().resource_bytes(back_buffer).unwrap();
    assert_eq!(&bytes[0..4], &[0, 0, 255, 255]);
}

#[rstest]
#[case::immediate(GpuTimeline::Immediate)]
#[case::deferred(GpuTimeline::Deferred)]
fn test_frame_loop_with_gpu_timelines(#[case] timeline: GpuTimeline) {
    let ctx = TestContext::with_timeline(timeline);
    let presenter = ctx.presenter(4, 4);
    let frame_loop = FrameLoop::new(&ctx.device, presenter, &FrameLoopConfig::new(2)).unwrap();
    let driver = ctx.spawn_driver();

    let mut handler = ClearHandler::default();
    for _ in 0..6 {
        frame_loop
            .tick(&mut handler, Duration::from_millis(16))
            .unwrap();
    }
    frame_loop.wait_idle().unwrap();
    driver.stop();

    assert_eq!(ctx.gpu().stats().presents, 6);
    assert_eq!(ctx.gpu().stats().lists_executed, 6);
}

#[test]
fn test_failed_present_still_signals_slot() {
    let ctx = TestContext::new();
    let frame_loop =
        FrameLoop::new(&ctx.device, ctx.presenter(4, 4), &FrameLoopConfig::new(2)).unwrap();
    let mut handler = ClearHandler::default();

    ctx.gpu()
        .inject_present_error(PresentError::Other("occluded".into()));
    let result = frame_loop.tick(&mut handler, Duration::ZERO);
    assert!(result.is_err());
    assert_eq!(ctx.device.queue(QueueType::Direct).last_signaled_value(), 1);

    // The loop keeps going after a transient failure.
    assert!(matches!(
        frame_loop.tick(&mut handler, Duration::ZERO).unwrap(),
        TickOutcome::Presented { frame_index: 1, .. }
    ));
}

#[test]
fn test_frame_loop_resize() {
    let ctx = TestContext::new();
    let frame_loop =
        FrameLoop::new(&ctx.device, ctx.presenter(4, 4), &FrameLoopConfig::new(2)).unwrap();
    let mut handler = ClearHandler::default();
    frame_loop.tick(&mut handler, Duration::ZERO).unwrap();

    frame_loop.resize(8, 2).unwrap();
    assert_eq!(
        frame_loop.with_presenter(|p| (p.parameters().width, p.parameters().height)),
        Some((8, 2))
    );
    frame_loop.tick(&mut handler, Duration::ZERO).unwrap();
}
