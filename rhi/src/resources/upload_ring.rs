//! Per-frame linear sub-allocator over a persistently mapped upload buffer.
//!
//! Each frame slot owns one ring. The CPU writes constants and dynamic
//! vertex data into consecutive regions during the frame; the ring is reset
//! only after the slot's fence shows the GPU finished reading it.
//!
//! # Example
//!
//! ```ignore
//! let mut ring = UploadRing::new(&device, 64 * 1024, "frame_constants")?;
//!
//! let alloc = ring.write_pod(&[camera_constants])?;
//! list.set_graphics_root_constant_buffer_view(0, alloc.gpu_address)?;
//!
//! // Next time this slot comes around, after its fence wait:
//! ring.reset();
//! ```

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::HeapType;

use super::GraphicsResource;
use super::align_up;

/// A sub-allocation from an upload ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadAllocation {
    /// Byte offset into the ring buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
    /// GPU virtual address of the first byte.
    pub gpu_address: u64,
}

impl UploadAllocation {
    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Linear allocator over an upload-heap buffer.
///
/// `UploadRing` is not thread-safe; it belongs to one frame slot.
pub struct UploadRing {
    buffer: Arc<GraphicsResource>,
    base_address: u64,
    capacity: u64,
    write_offset: u64,
    default_alignment: u64,
    reset_count: u64,
}

impl UploadRing {
    /// Default alignment for allocations, matching constant buffer placement.
    pub const DEFAULT_ALIGNMENT: u64 = 256;

    /// Create a ring of at least `capacity` bytes.
    pub fn new(device: &Arc<GraphicsDevice>, capacity: u64, label: &str) -> GraphicsResult<Self> {
        Self::with_alignment(device, capacity, label, Self::DEFAULT_ALIGNMENT)
    }

    /// Create a ring with a custom allocation alignment (power of 2).
    pub fn with_alignment(
        device: &Arc<GraphicsDevice>,
        capacity: u64,
        label: &str,
        alignment: u64,
    ) -> GraphicsResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "upload ring capacity cannot be zero".to_string(),
            ));
        }

        let aligned_capacity = align_up(capacity, alignment);
        let buffer =
            device.create_buffer(aligned_capacity, HeapType::Upload, Some(&format!("{label}_ring")))?;
        let base_address = buffer.gpu_virtual_address()?;

        Ok(Self {
            buffer,
            base_address,
            capacity: aligned_capacity,
            write_offset: 0,
            default_alignment: alignment,
            reset_count: 0,
        })
    }

    /// Get the underlying upload buffer.
    pub fn buffer(&self) -> &Arc<GraphicsResource> {
        &self.buffer
    }

    /// Get the total capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get the amount of space used since the last reset.
    pub fn used(&self) -> u64 {
        self.write_offset
    }

    /// Get the amount of space remaining.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.write_offset
    }

    /// Number of resets that reclaimed a non-empty ring.
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    /// Reserve `size` bytes at the default alignment.
    ///
    /// Returns `None` if the space left is too small. The ring never wraps
    /// on its own; space comes back only through [`reset`](Self::reset).
    pub fn allocate(&mut self, size: u64) -> Option<UploadAllocation> {
        self.allocate_aligned(size, self.default_alignment)
    }

    /// Reserve `size` bytes at a custom alignment (power of 2).
    pub fn allocate_aligned(&mut self, size: u64, alignment: u64) -> Option<UploadAllocation> {
        debug_assert!(alignment.is_power_of_two(), "alignment must be power of 2");

        let offset = align_up(self.write_offset, alignment);
        if offset.checked_add(size).is_none_or(|end| end > self.capacity) {
            return None;
        }
        self.write_offset = offset + size;

        Some(UploadAllocation {
            offset,
            size,
            gpu_address: self.base_address + offset,
        })
    }

    /// Copy bytes into a fresh allocation.
    pub fn write(&mut self, data: &[u8]) -> GraphicsResult<UploadAllocation> {
        let size = data.len() as u64;
        let allocation = self.allocate(size).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "upload ring exhausted: {size} bytes requested, {} remaining",
                self.remaining()
            ))
        })?;
        self.buffer.write_data(allocation.offset, data)?;
        Ok(allocation)
    }

    /// Copy plain-old-data values into a fresh allocation.
    pub fn write_pod<T: bytemuck::Pod>(&mut self, values: &[T]) -> GraphicsResult<UploadAllocation> {
        self.write(bytemuck::cast_slice(values))
    }

    /// Reclaim the whole ring.
    ///
    /// Only call this once the GPU is done with every allocation, which for
    /// a frame slot means after its fence wait.
    pub fn reset(&mut self) {
        if self.write_offset > 0 {
            self.reset_count += 1;
            self.write_offset = 0;
        }
    }
}

impl std::fmt::Debug for UploadRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRing")
            .field("capacity", &self.capacity)
            .field("write_offset", &self.write_offset)
            .field("default_alignment", &self.default_alignment)
            .field("reset_count", &self.reset_count)
            .field("buffer", &self.buffer.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(DeviceConfig::default()).unwrap()
    }

    #[test]
    fn test_upload_ring_creation() {
        let device = create_test_device();
        let ring = UploadRing::new(&device, 1000, "test").unwrap();
        assert_eq!(ring.capacity(), 1024);
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.remaining(), 1024);
    }

    #[test]
    fn test_allocations_are_aligned() {
        let device = create_test_device();
        let mut ring = UploadRing::new(&device, 1024, "test").unwrap();

        let a = ring.allocate(100).unwrap();
        let b = ring.allocate(50).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(b.gpu_address - a.gpu_address, 256);
        assert_eq!(ring.used(), 306);
    }

    #[test]
    fn test_exhaustion_and_reset() {
        let device = create_test_device();
        let mut ring = UploadRing::new(&device, 512, "test").unwrap();

        ring.allocate(400).unwrap();
        assert!(ring.allocate(200).is_none());
        assert!(ring.write(&[0u8; 300]).is_err());

        ring.reset();
        assert_eq!(ring.reset_count(), 1);
        assert_eq!(ring.allocate(512).unwrap().offset, 0);
    }

    #[test]
    fn test_oversized_request_is_refused() {
        let device = create_test_device();
        let mut ring = UploadRing::new(&device, 512, "test").unwrap();
        ring.allocate(1).unwrap();
        assert!(ring.allocate(u64::MAX).is_none());
        assert!(ring.allocate_aligned(u64::MAX - 255, 256).is_none());
        assert_eq!(ring.used(), 1);
        assert_eq!(ring.allocate(256).unwrap().offset, 256);
    }

    #[test]
    fn test_reset_of_empty_ring_is_not_counted() {
        let device = create_test_device();
        let mut ring = UploadRing::new(&device, 256, "test").unwrap();
        ring.reset();
        assert_eq!(ring.reset_count(), 0);
    }

    #[test]
    fn test_invalid_parameters() {
        let device = create_test_device();
        assert!(UploadRing::new(&device, 0, "test").is_err());
        assert!(UploadRing::with_alignment(&device, 256, "test", 100).is_err());
    }
}
