//! GPU memory allocations.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{GpuBackend, ResourceId};
use crate::descriptors::CpuDescriptorHandle;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    ConstantBufferViewDescription, Format, HeapType, IndexBufferView, ResourceDescriptor,
    ResourceStates, VertexBufferView, ViewDescription,
};

use super::ConstantBufferView;

/// Constant buffer views must cover a multiple of this many bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// A buffer or texture allocation.
///
/// The resource tracks the access state declared by the last recorded
/// barrier, so a barrier whose `before` state is wrong fails at record time
/// instead of corrupting GPU memory.
pub struct GraphicsResource {
    backend: Arc<dyn GpuBackend>,
    device: Weak<GraphicsDevice>,
    id: ResourceId,
    descriptor: ResourceDescriptor,
    heap_type: HeapType,
    state: Mutex<ResourceStates>,
    default_cbv: Mutex<Option<CpuDescriptorHandle>>,
}

impl GraphicsResource {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        device: Weak<GraphicsDevice>,
        id: ResourceId,
        descriptor: ResourceDescriptor,
        heap_type: HeapType,
        initial_state: ResourceStates,
    ) -> Self {
        Self {
            backend,
            device,
            id,
            descriptor,
            heap_type,
            state: Mutex::new(initial_state),
            default_cbv: Mutex::new(None),
        }
    }

    /// Get the native id.
    pub fn native_id(&self) -> ResourceId {
        self.id
    }

    /// Get the descriptor this resource was created from.
    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    /// Get the debug label.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Memory heap the resource lives in.
    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    /// Texel format. [`Format::Unknown`] for buffers.
    pub fn format(&self) -> Format {
        self.descriptor.format
    }

    /// Width in texels, or size in bytes for buffers.
    pub fn width(&self) -> u64 {
        self.descriptor.width
    }

    /// Height in texels.
    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    /// Size of the allocation in bytes.
    pub fn size_in_bytes(&self) -> u64 {
        self.descriptor.size_in_bytes()
    }

    /// Check if this resource is a buffer.
    pub fn is_buffer(&self) -> bool {
        self.descriptor.is_buffer()
    }

    /// Access state declared by the last recorded barrier.
    pub fn current_state(&self) -> ResourceStates {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ResourceStates) {
        *self.state.lock() = state;
    }

    /// The device that created this resource, if it is still alive.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    pub(crate) fn require_device(&self) -> GraphicsResult<Arc<GraphicsDevice>> {
        self.device
            .upgrade()
            .ok_or_else(|| GraphicsError::Internal("graphics device has been dropped".into()))
    }

    pub(crate) fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// GPU virtual address of the first byte. Buffers only.
    pub fn gpu_virtual_address(&self) -> GraphicsResult<u64> {
        self.backend.gpu_virtual_address(self.id)
    }

    /// Write bytes through the persistent mapping. Upload heap only.
    pub fn write_data(&self, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        self.backend.write_resource(self.id, offset, data)
    }

    /// Write plain-old-data values through the persistent mapping.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: u64, values: &[T]) -> GraphicsResult<()> {
        self.write_data(offset, bytemuck::cast_slice(values))
    }

    /// Read bytes through the mapping. Readback heap only.
    pub fn read_data(&self, offset: u64, out: &mut [u8]) -> GraphicsResult<()> {
        self.backend.read_resource(self.id, offset, out)
    }

    /// Read the whole resource into a new vector. Readback heap only.
    pub fn read_to_vec(&self) -> GraphicsResult<Vec<u8>> {
        let mut out = vec![0; self.size_in_bytes() as usize];
        self.read_data(0, &mut out)?;
        Ok(out)
    }

    /// Read plain-old-data values from the start of the resource.
    pub fn read_pod<T: bytemuck::Pod>(&self, count: usize) -> GraphicsResult<Vec<T>> {
        let mut out = vec![T::zeroed(); count];
        self.read_data(0, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }

    /// Vertex buffer binding covering the whole buffer.
    pub fn vertex_buffer_view(&self, stride: u32) -> GraphicsResult<VertexBufferView> {
        Ok(VertexBufferView {
            buffer_location: self.gpu_virtual_address()?,
            size_in_bytes: self.buffer_size_u32()?,
            stride_in_bytes: stride,
        })
    }

    /// Index buffer binding covering the whole buffer.
    pub fn index_buffer_view(&self, format: Format) -> GraphicsResult<IndexBufferView> {
        if !format.is_index() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} is not an index format"
            )));
        }
        Ok(IndexBufferView {
            buffer_location: self.gpu_virtual_address()?,
            size_in_bytes: self.buffer_size_u32()?,
            format,
        })
    }

    fn buffer_size_u32(&self) -> GraphicsResult<u32> {
        u32::try_from(self.size_in_bytes()).map_err(|_| {
            GraphicsError::InvalidParameter("buffer is too large for a binding".into())
        })
    }

    /// The whole-buffer constant buffer view, created on first use.
    ///
    /// The view's slot comes from the device's CBV/SRV/UAV allocator and is
    /// subject to that allocator's wraparound.
    pub fn default_constant_buffer_view(self: &Arc<Self>) -> GraphicsResult<ConstantBufferView> {
        let mut cached = self.default_cbv.lock();
        if let Some(handle) = *cached {
            return Ok(ConstantBufferView::from_existing(
                self.clone(),
                handle,
                self.whole_buffer_cbv()?,
            ));
        }
        let view = ConstantBufferView::new(self)?;
        *cached = Some(view.cpu_handle());
        Ok(view)
    }

    pub(crate) fn whole_buffer_cbv(&self) -> GraphicsResult<ViewDescription> {
        if !self.is_buffer() {
            return Err(GraphicsError::InvalidParameter(
                "constant buffer views need a buffer".into(),
            ));
        }
        let size = align_up(self.size_in_bytes(), CONSTANT_BUFFER_ALIGNMENT);
        Ok(ViewDescription::ConstantBuffer(ConstantBufferViewDescription {
            buffer_location: self.gpu_virtual_address()?,
            size_in_bytes: u32::try_from(size).map_err(|_| {
                GraphicsError::InvalidParameter("constant buffer is too large".into())
            })?,
        }))
    }
}

impl Drop for GraphicsResource {
    fn drop(&mut self) {
        log::trace!(
            "Destroying resource {}",
            self.descriptor.label.as_deref().unwrap_or("(unnamed)")
        );
        self.backend.destroy_resource(self.id);
    }
}

impl std::fmt::Debug for GraphicsResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsResource")
            .field("id", &self.id)
            .field("label", &self.descriptor.label)
            .field("dimension", &self.descriptor.dimension)
            .field("heap_type", &self.heap_type)
            .field("state", &self.current_state())
            .finish()
    }
}

/// Align a value up to the given alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

static_assertions::assert_impl_all!(GraphicsResource: Send, Sync);
