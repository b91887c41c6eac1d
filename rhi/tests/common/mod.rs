//! Common utilities for RHI integration tests.
//!
//! Every test runs on the software GPU. Tests that want to observe the CPU
//! running ahead of the GPU use [`GpuTimeline::Deferred`] and drive the
//! timeline themselves, usually from a [`GpuDriver`] thread.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use redlilium_rhi::backend::QueueId;
use redlilium_rhi::types::{CommandListType, QueueType};
use redlilium_rhi::{
    CompiledCommandList, DeviceConfig, DummyBackend, GpuTimeline, GraphicsDevice,
    PresentationParameters, SwapChainPresenter,
};

/// Install a test logger once. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A device on the software GPU.
pub struct TestContext {
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    /// Device whose GPU work runs as soon as it is submitted.
    pub fn new() -> Self {
        Self::with_timeline(GpuTimeline::Immediate)
    }

    /// Device whose GPU work runs only when driven.
    pub fn deferred() -> Self {
        Self::with_timeline(GpuTimeline::Deferred)
    }

    pub fn with_timeline(timeline: GpuTimeline) -> Self {
        init_logging();
        let config = DeviceConfig::new()
            .with_label("test device")
            .with_validation(true)
            .with_timeline(timeline);
        let device = GraphicsDevice::new(config).expect("Failed to create device");
        Self { device }
    }

    /// The software GPU behind the device.
    pub fn gpu(&self) -> &DummyBackend {
        self.device
            .dummy_backend()
            .expect("test device should run on the dummy backend")
    }

    /// Native id of one of the device queues.
    pub fn queue_id(&self, queue_type: QueueType) -> QueueId {
        self.device.queue(queue_type).native_id()
    }

    /// An empty closed list of `list_type`.
    pub fn empty_list(&self, list_type: CommandListType) -> CompiledCommandList {
        let allocator = self
            .device
            .create_command_allocator(list_type)
            .expect("Failed to create allocator");
        let mut list = self
            .device
            .create_command_list(list_type, allocator, None)
            .expect("Failed to create command list");
        list.close().expect("Failed to close command list")
    }

    /// A presenter with a small swap chain.
    pub fn presenter(&self, width: u32, height: u32) -> SwapChainPresenter {
        SwapChainPresenter::new(&self.device, PresentationParameters::new(width, height))
            .expect("Failed to create presenter")
    }

    /// Start a thread that keeps flushing the GPU until stopped.
    pub fn spawn_driver(&self) -> GpuDriver {
        let device = self.device.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::spawn(move || {
            let gpu = device.dummy_backend().expect("dummy backend");
            while !flag.load(Ordering::Acquire) {
                gpu.flush().expect("GPU flush failed");
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        GpuDriver {
            stop,
            handle: Some(handle),
        }
    }
}

/// A background thread playing the GPU. Stops on drop.
pub struct GpuDriver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpuDriver {
    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.join().expect("GPU driver thread panicked");
        }
    }
}

impl Drop for GpuDriver {
    fn drop(&mut self) {
        self.join();
    }
}

/// Bytes `0, 1, 2, ...` wrapping at 256.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}
