//! # Frame Ring Demo
//!
//! Demonstrates:
//! - Device creation on the software GPU
//! - Static geometry uploaded through the device's upload list
//! - Per-slot bundles and per-frame constants in the upload ring
//! - The frame loop keeping several frames in flight
//!
//! With `--deferred` the software GPU runs on its own thread, so the CPU
//! can record ahead of it and block on frame fences the way it would with
//! real hardware.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::Parser;

use redlilium_demos::SpinningQuad;
use redlilium_rhi::{
    DeviceConfig, FrameLoop, FrameLoopConfig, GpuTimeline, GraphicsDevice, GraphicsError,
    GraphicsResult, MAX_FRAMES_IN_FLIGHT, PresentationParameters, SwapChainPresenter,
    TickOutcome,
};

/// Headless frames-in-flight demo on the software GPU.
#[derive(Parser, Debug)]
#[command(name = "frame_ring_demo", about = "Spinning quad on the software GPU", version)]
struct Args {
    /// Number of frames the CPU may record ahead of the GPU.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..=MAX_FRAMES_IN_FLIGHT as u64))]
    frames_in_flight: u64,

    /// Exit after rendering N frames.
    #[arg(long, default_value_t = 300)]
    max_frames: u64,

    /// Vertical blanks to wait per present (0 disables vsync).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(0..=4))]
    sync_interval: u32,

    /// Run GPU work on a separate thread instead of at submission.
    #[arg(long)]
    deferred: bool,

    /// Back buffer width in pixels.
    #[arg(long, default_value_t = 320)]
    width: u32,

    /// Back buffer height in pixels.
    #[arg(long, default_value_t = 240)]
    height: u32,
}

/// Drives the deferred software GPU until dropped.
struct GpuThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpuThread {
    fn spawn(device: Arc<GraphicsDevice>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::spawn(move || {
            let Some(gpu) = device.dummy_backend() else {
                log::error!("Deferred timeline needs the dummy backend");
                return;
            };
            while !flag.load(Ordering::Acquire) {
                if let Err(e) = gpu.flush() {
                    log::error!("GPU thread stopped: {e}");
                    return;
                }
                // Roughly one 60 Hz frame of GPU latency.
                std::thread::sleep(Duration::from_millis(16));
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("GPU thread panicked");
        }
    }
}

fn run(args: &Args) -> GraphicsResult<()> {
    let device = GraphicsDevice::new(DeviceConfig::new().with_label("frame ring demo"))?;
    let params = PresentationParameters::new(args.width, args.height)
        .with_sync_interval(args.sync_interval);

    // Uploads are synchronous, so the scene is built before the GPU is
    // moved to its own thread.
    let mut quad = SpinningQuad::new(&device, params.back_buffer_format)?;
    let presenter = SwapChainPresenter::new(&device, params)?;
    let frame_loop = FrameLoop::new(
        &device,
        presenter,
        &FrameLoopConfig::new(args.frames_in_flight as usize),
    )?
    .with_pipeline(quad.pipeline().clone());
    frame_loop.init_bundles(|list| quad.record_draw(list))?;

    let _gpu_thread = if args.deferred {
        let gpu = device
            .dummy_backend()
            .ok_or_else(|| GraphicsError::InitializationFailed("no software GPU".into()))?;
        gpu.set_timeline(GpuTimeline::Deferred)?;
        Some(GpuThread::spawn(device.clone()))
    } else {
        None
    };

    log::info!(
        "Rendering {} frames, {} in flight, {} timeline",
        args.max_frames,
        args.frames_in_flight,
        if args.deferred { "deferred" } else { "immediate" }
    );

    let start = Instant::now();
    let mut last = start;
    let mut presented = 0u64;
    for _ in 0..args.max_frames {
        let now = Instant::now();
        let delta = now - last;
        last = now;
        if let TickOutcome::Presented { .. } = frame_loop.tick(&mut quad, delta)? {
            presented += 1;
        }
    }
    frame_loop.wait_idle()?;

    let elapsed = start.elapsed();
    log::info!(
        "Presented {presented} frames in {:.2?} ({:.1} fps), final angle {:.3} rad",
        elapsed,
        presented as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        quad.angle()
    );
    if let Some(gpu) = device.dummy_backend() {
        log::info!("GPU stats: {:?}", gpu.stats());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting RedLilium frame ring demo");
    log::info!("Demos version: {}", redlilium_demos::VERSION);
    redlilium_rhi::init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}
