use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_rhi::types::{
    CommandListType, DescriptorHeapFlags, DescriptorHeapType, HeapType, QueueType,
};
use redlilium_rhi::{
    DescriptorAllocator, DeviceConfig, FrameHandler, FrameLoop, FrameLoopConfig, FrameRing,
    FrameTime, GraphicsDevice, GraphicsPresenter, GraphicsResult, PresentationParameters,
    RenderContext, ShaderResourceView, SwapChainPresenter,
};

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

fn bench_descriptor_allocate(c: &mut Criterion) {
    let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
    let allocator = DescriptorAllocator::new(
        device.backend().clone(),
        DescriptorHeapType::CbvSrvUav,
        4096,
        DescriptorHeapFlags::empty(),
    )
    .unwrap();

    c.bench_function("descriptor_allocate_8", |b| {
        b.iter(|| black_box(allocator.allocate(black_box(8)).unwrap()));
    });
}

fn bench_descriptor_set_fill(c: &mut Criterion) {
    let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
    let views: Vec<_> = (0..8)
        .map(|_| {
            let buffer = device.create_buffer(256, HeapType::Default, None).unwrap();
            ShaderResourceView::new(&buffer).unwrap()
        })
        .collect();

    c.bench_function("descriptor_set_fill_8_views", |b| {
        b.iter(|| {
            let mut set = device
                .create_descriptor_set(DescriptorHeapType::CbvSrvUav, 8)
                .unwrap();
            set.add_resource_views(&views).unwrap();
            black_box(set);
        });
    });
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

fn bench_signal_and_wait(c: &mut Criterion) {
    let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
    let queue = device.queue(QueueType::Direct);

    c.bench_function("queue_signal_wait", |b| {
        b.iter(|| {
            let value = queue.add_signal().unwrap();
            queue.wait_for_signal(value).unwrap();
        });
    });
}

fn bench_record_and_submit(c: &mut Criterion) {
    let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
    let src = device
        .create_buffer_with_data(&[7u8; 4096], HeapType::Upload, None)
        .unwrap();
    let dst = device.create_buffer(4096, HeapType::Readback, None).unwrap();
    let allocator = device
        .create_command_allocator(CommandListType::Direct)
        .unwrap();
    let mut list = device
        .create_command_list(CommandListType::Direct, allocator, None)
        .unwrap();
    list.close().unwrap();
    let queue = device.queue(QueueType::Direct);

    c.bench_function("record_copy_and_submit", |b| {
        b.iter(|| {
            list.reset().unwrap();
            list.copy_buffer_region(&dst, 0, &src, 0, 4096).unwrap();
            let compiled = list.close().unwrap();
            black_box(queue.execute_command_lists(&[&compiled]).unwrap());
        });
    });
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

fn bench_frame_ring_cycle(c: &mut Criterion) {
    let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
    let mut ring = FrameRing::new(&device, QueueType::Direct, &FrameLoopConfig::new(3)).unwrap();

    c.bench_function("frame_ring_begin_end", |b| {
        b.iter(|| {
            ring.begin_frame().unwrap();
            black_box(ring.end_frame().unwrap());
        });
    });
}

struct ClearOnly;

impl FrameHandler for ClearOnly {
    fn update(&mut self, _time: &FrameTime) -> GraphicsResult<()> {
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderContext<'_>) -> GraphicsResult<()> {
        let rtv = ctx.presenter.render_target_view()?;
        ctx.list.clear_render_target_view(rtv, [0.1, 0.2, 0.3, 1.0])
    }
}

fn bench_frame_loop_tick(c: &mut Criterion) {
    let device = GraphicsDevice::new(DeviceConfig::default()).unwrap();
    let presenter = SwapChainPresenter::new(&device, PresentationParameters::new(64, 64)).unwrap();
    let frame_loop = FrameLoop::new(&device, presenter, &FrameLoopConfig::new(2)).unwrap();
    let mut handler = ClearOnly;

    c.bench_function("frame_loop_tick_64x64_clear", |b| {
        b.iter(|| {
            black_box(
                frame_loop
                    .tick(&mut handler, Duration::from_millis(16))
                    .unwrap(),
            );
        });
    });
}

criterion_group!(descriptors, bench_descriptor_allocate, bench_descriptor_set_fill);
criterion_group!(submission, bench_signal_and_wait, bench_record_and_submit);
criterion_group!(frames, bench_frame_ring_cycle, bench_frame_loop_tick);
criterion_main!(descriptors, submission, frames);
