//! Bump allocator over a fixed-capacity descriptor heap.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{GpuBackend, HeapId};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{DescriptorHeapDescriptor, DescriptorHeapFlags, DescriptorHeapType};

use super::{CpuDescriptorHandle, GpuDescriptorHandle};

/// Largest capacity a descriptor allocator can be created with.
pub const DESCRIPTORS_PER_HEAP: u32 = 4096;

#[derive(Debug, Default)]
struct Cursor {
    current: u32,
    wrap_count: u64,
}

/// A bump allocator over one descriptor heap.
///
/// Allocations advance a cursor. When a request does not fit in the space
/// left, the cursor returns to slot 0 and the request is served from the
/// start of the heap.
///
/// # Wraparound
///
/// Wrapping does not wait for the GPU. Every handle issued before the wrap
/// may be overwritten by later allocations, including descriptors still
/// referenced by command lists in flight. Callers size heaps so that one
/// wrap takes longer than the frames in flight; [`wrap_count`] exposes how
/// often it happened.
///
/// # Thread Safety
///
/// The cursor is guarded by a single lock, so allocators can be shared
/// between threads.
///
/// [`wrap_count`]: Self::wrap_count
pub struct DescriptorAllocator {
    backend: Arc<dyn GpuBackend>,
    heap: HeapId,
    heap_type: DescriptorHeapType,
    shader_visible: bool,
    capacity: u32,
    increment_size: u32,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
    cursor: Mutex<Cursor>,
}

impl DescriptorAllocator {
    /// Create an allocator over a new heap of `capacity` descriptors.
    ///
    /// `capacity` must be in `1..=DESCRIPTORS_PER_HEAP`.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        heap_type: DescriptorHeapType,
        capacity: u32,
        flags: DescriptorHeapFlags,
    ) -> GraphicsResult<Self> {
        if !(1..=DESCRIPTORS_PER_HEAP).contains(&capacity) {
            return Err(GraphicsError::out_of_range(
                "descriptor heap capacity",
                u64::from(capacity),
                1,
                u64::from(DESCRIPTORS_PER_HEAP),
            ));
        }

        let descriptor = DescriptorHeapDescriptor::new(heap_type, capacity, flags)
            .with_label(format!("{heap_type:?} descriptor heap"));
        let heap = backend.create_descriptor_heap(&descriptor)?;
        let shader_visible = descriptor.is_shader_visible();
        let cpu_start = backend.heap_cpu_start(heap)?;
        let gpu_start = if shader_visible {
            Some(backend.heap_gpu_start(heap)?)
        } else {
            None
        };
        let increment_size = backend.descriptor_increment_size(heap_type);

        log::debug!(
            "Created {:?} descriptor allocator: {} slots, shader visible: {}",
            heap_type,
            capacity,
            shader_visible
        );

        Ok(Self {
            backend,
            heap,
            heap_type,
            shader_visible,
            capacity,
            increment_size,
            cpu_start,
            gpu_start,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    /// Reserve `count` contiguous descriptors and return the first handle.
    ///
    /// `count` must be in `1..=capacity`. If the remaining space is too small
    /// the allocator wraps to slot 0 (see the type docs).
    pub fn allocate(&self, count: u32) -> GraphicsResult<CpuDescriptorHandle> {
        if !(1..=self.capacity).contains(&count) {
            return Err(GraphicsError::out_of_range(
                "descriptor count",
                u64::from(count),
                1,
                u64::from(self.capacity),
            ));
        }

        let mut cursor = self.cursor.lock();
        if cursor.current + count > self.capacity {
            cursor.wrap_count += 1;
            log::warn!(
                "{:?} descriptor heap wrapped around ({} of {} used, {} requested); \
                 handles issued before the wrap are now invalid",
                self.heap_type,
                cursor.current,
                self.capacity,
                count
            );
            cursor.current = 0;
        }

        let handle = self.cpu_start.offset(cursor.current, self.increment_size);
        cursor.current += count;
        Ok(handle)
    }

    /// Handle of slot `slot`, bypassing the cursor.
    pub fn allocate_slot(&self, slot: u32) -> GraphicsResult<CpuDescriptorHandle> {
        if slot >= self.capacity {
            return Err(GraphicsError::out_of_range(
                "descriptor slot",
                u64::from(slot),
                0,
                u64::from(self.capacity - 1),
            ));
        }
        Ok(self.cpu_start.offset(slot, self.increment_size))
    }

    /// GPU handle matching a CPU handle of this allocator.
    ///
    /// Only shader-visible heaps have GPU handles.
    pub fn gpu_handle(&self, cpu_handle: CpuDescriptorHandle) -> GraphicsResult<GpuDescriptorHandle> {
        let gpu_start = self.gpu_start.ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "{:?} descriptor heap is not shader visible",
                self.heap_type
            ))
        })?;
        let slot = self.slot_index(cpu_handle).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "handle {:#x} does not belong to this allocator",
                cpu_handle.ptr
            ))
        })?;
        Ok(gpu_start.offset(slot, self.increment_size))
    }

    /// Slot index of a handle issued by this allocator.
    pub fn slot_index(&self, handle: CpuDescriptorHandle) -> Option<u32> {
        let offset = handle.ptr.checked_sub(self.cpu_start.ptr)?;
        let increment = u64::from(self.increment_size);
        let slot = offset / increment;
        (offset % increment == 0 && slot < u64::from(self.capacity)).then_some(slot as u32)
    }

    /// Number of slots consumed since the last wrap.
    pub fn current_descriptor_count(&self) -> u32 {
        self.cursor.lock().current
    }

    /// Number of times the cursor returned to slot 0.
    pub fn wrap_count(&self) -> u64 {
        self.cursor.lock().wrap_count
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Byte stride between consecutive descriptors.
    pub fn descriptor_increment_size(&self) -> u32 {
        self.increment_size
    }

    /// Kind of descriptors stored.
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    /// Whether shaders can read this heap.
    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    /// Native heap backing the allocator.
    pub fn heap_id(&self) -> HeapId {
        self.heap
    }

    /// First CPU handle of the heap.
    pub fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    pub(crate) fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_heap(self.heap);
    }
}

impl std::fmt::Debug for DescriptorAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cursor = self.cursor.lock();
        f.debug_struct("DescriptorAllocator")
            .field("heap_type", &self.heap_type)
            .field("shader_visible", &self.shader_visible)
            .field("capacity", &self.capacity)
            .field("current", &cursor.current)
            .field("wrap_count", &cursor.wrap_count)
            .finish()
    }
}

static_assertions::assert_impl_all!(DescriptorAllocator: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn allocator(capacity: u32, flags: DescriptorHeapFlags) -> DescriptorAllocator {
        DescriptorAllocator::new(
            Arc::new(DummyBackend::new()),
            DescriptorHeapType::CbvSrvUav,
            capacity,
            flags,
        )
        .unwrap()
    }

    #[test]
    fn test_sequential_allocation() {
        let alloc = allocator(16, DescriptorHeapFlags::empty());
        let inc = alloc.descriptor_increment_size();
        let a = alloc.allocate(2).unwrap();
        let b = alloc.allocate(3).unwrap();
        assert_eq!(a, alloc.cpu_start());
        assert_eq!(b, a.offset(2, inc));
        assert_eq!(alloc.current_descriptor_count(), 5);
        assert_eq!(alloc.slot_index(b), Some(2));
    }

    #[test]
    fn test_wraparound_yields_base_handle() {
        let alloc = allocator(8, DescriptorHeapFlags::empty());
        alloc.allocate(5).unwrap();
        let wrapped = alloc.allocate(8 - 5 + 1).unwrap();
        assert_eq!(wrapped, alloc.cpu_start());
        assert_eq!(alloc.wrap_count(), 1);
        assert_eq!(alloc.current_descriptor_count(), 4);
    }

    #[test]
    fn test_exact_fit_does_not_wrap() {
        let alloc = allocator(4, DescriptorHeapFlags::empty());
        alloc.allocate(2).unwrap();
        alloc.allocate(2).unwrap();
        assert_eq!(alloc.wrap_count(), 0);
        assert_eq!(alloc.current_descriptor_count(), 4);
    }

    #[test]
    fn test_count_out_of_range() {
        let alloc = allocator(4, DescriptorHeapFlags::empty());
        assert!(matches!(
            alloc.allocate(0),
            Err(GraphicsError::OutOfRange { value: 0, .. })
        ));
        assert!(matches!(
            alloc.allocate(5),
            Err(GraphicsError::OutOfRange { value: 5, max: 4, .. })
        ));
    }

    #[test]
    fn test_capacity_out_of_range() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        for capacity in [0, DESCRIPTORS_PER_HEAP + 1] {
            let result = DescriptorAllocator::new(
                backend.clone(),
                DescriptorHeapType::Sampler,
                capacity,
                DescriptorHeapFlags::empty(),
            );
            assert!(matches!(result, Err(GraphicsError::OutOfRange { .. })));
        }
    }

    #[test]
    fn test_gpu_handle_requires_shader_visible() {
        let cpu_only = allocator(4, DescriptorHeapFlags::empty());
        let handle = cpu_only.allocate(1).unwrap();
        assert!(cpu_only.gpu_handle(handle).is_err());

        let visible = allocator(4, DescriptorHeapFlags::SHADER_VISIBLE);
        visible.allocate(1).unwrap();
        let second = visible.allocate(1).unwrap();
        let first_gpu = visible.gpu_handle(visible.cpu_start()).unwrap();
        let second_gpu = visible.gpu_handle(second).unwrap();
        assert_eq!(
            second_gpu.ptr - first_gpu.ptr,
            u64::from(visible.descriptor_increment_size())
        );
    }

    #[test]
    fn test_allocate_slot_bypasses_cursor() {
        let alloc = allocator(4, DescriptorHeapFlags::empty());
        let slot = alloc.allocate_slot(3).unwrap();
        assert_eq!(alloc.slot_index(slot), Some(3));
        assert_eq!(alloc.current_descriptor_count(), 0);
        assert!(alloc.allocate_slot(4).is_err());
    }

    #[test]
    fn test_drop_releases_heap() {
        let backend = Arc::new(DummyBackend::new());
        let alloc = DescriptorAllocator::new(
            backend.clone(),
            DescriptorHeapType::Rtv,
            4,
            DescriptorHeapFlags::empty(),
        )
        .unwrap();
        assert_eq!(backend.live_heap_count(), 1);
        drop(alloc);
        assert_eq!(backend.live_heap_count(), 0);
    }
}
