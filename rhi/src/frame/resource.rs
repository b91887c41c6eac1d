//! Per-slot frame state.

use std::sync::Arc;
use std::time::Duration;

use crate::command::{CommandAllocator, CommandList, CommandQueue, CompiledCommandList};
use crate::device::GraphicsDevice;
use crate::error::GraphicsResult;
use crate::pipeline::PipelineState;
use crate::resources::UploadRing;
use crate::types::CommandListType;

/// Everything one in-flight frame owns.
///
/// A slot holds a command allocator, the fence value the GPU must reach
/// before that allocator may be reset, an optional prerecorded bundle and an
/// upload ring for per-frame constants.
///
/// ```text
/// wait_for_signal ──► populate_command_list ──► execute ──► add_signal
///        ▲                                                      │
///        └──────────────── N frames later ──────────────────────┘
/// ```
pub struct FrameResource {
    index: usize,
    allocator: Arc<CommandAllocator>,
    fence_value: u64,
    bundle: Option<CompiledCommandList>,
    upload: UploadRing,
}

impl FrameResource {
    /// Create slot `index` recording lists of `list_type`.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        index: usize,
        list_type: CommandListType,
        upload_capacity: u64,
    ) -> GraphicsResult<Self> {
        let allocator = device.create_command_allocator(list_type)?;
        let upload = UploadRing::new(device, upload_capacity, &format!("frame {index} upload ring"))?;
        Ok(Self {
            index,
            allocator,
            fence_value: 0,
            bundle: None,
            upload,
        })
    }

    /// Position of the slot in its ring.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The slot's command allocator.
    pub fn allocator(&self) -> &Arc<CommandAllocator> {
        &self.allocator
    }

    /// The last fence value signaled for this slot, 0 if never used.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// The prerecorded bundle, if any.
    pub fn bundle(&self) -> Option<&CompiledCommandList> {
        self.bundle.as_ref()
    }

    /// The slot's upload ring.
    pub fn upload_ring(&mut self) -> &mut UploadRing {
        &mut self.upload
    }

    /// Block until the GPU finished the work last submitted from this slot.
    pub fn wait_for_signal(&self, queue: &CommandQueue) -> GraphicsResult<()> {
        if self.fence_value != 0 {
            queue.wait_for_signal(self.fence_value)?;
        }
        Ok(())
    }

    /// Like [`wait_for_signal`](Self::wait_for_signal), giving up after
    /// `timeout`. Returns `true` if the slot is free.
    pub fn wait_for_signal_timeout(&self, queue: &CommandQueue, timeout: Duration) -> GraphicsResult<bool> {
        if self.fence_value == 0 {
            return Ok(true);
        }
        queue.wait_for_signal_timeout(self.fence_value, timeout)
    }

    /// Whether the slot's last work is complete, without blocking.
    pub fn is_ready(&self, queue: &CommandQueue) -> GraphicsResult<bool> {
        queue.is_complete(self.fence_value)
    }

    /// Signal `queue` and remember the value for this slot.
    pub fn add_signal(&mut self, queue: &CommandQueue) -> GraphicsResult<u64> {
        self.fence_value = queue.add_signal()?;
        Ok(self.fence_value)
    }

    /// Record the static part of the frame once into a bundle.
    pub fn init_bundle(
        &mut self,
        device: &GraphicsDevice,
        pipeline: Option<&PipelineState>,
        record: impl FnOnce(&mut CommandList) -> GraphicsResult<()>,
    ) -> GraphicsResult<()> {
        let allocator = device.create_command_allocator(CommandListType::Bundle)?;
        let mut list = device
            .create_command_list(CommandListType::Bundle, allocator, pipeline)?
            .with_label(format!("frame {} bundle", self.index));
        let recorded = record(&mut list);
        let compiled = list.close()?;
        recorded?;
        log::debug!("Recorded bundle for frame slot {}", self.index);
        self.bundle = Some(compiled);
        Ok(())
    }

    /// Reset the slot's allocator and record this frame's commands.
    ///
    /// Must only be called after [`wait_for_signal`](Self::wait_for_signal).
    /// The closure gets the list, the slot's bundle and its upload ring; the
    /// list is closed afterwards even if the closure fails.
    pub fn populate_command_list(
        &mut self,
        list: &mut CommandList,
        pipeline: Option<&PipelineState>,
        record: impl FnOnce(&mut CommandList, Option<&CompiledCommandList>, &mut UploadRing) -> GraphicsResult<()>,
    ) -> GraphicsResult<CompiledCommandList> {
        self.allocator.reset()?;
        list.reset_with(self.allocator.clone(), pipeline)?;
        let recorded = record(list, self.bundle.as_ref(), &mut self.upload);
        let compiled = list.close()?;
        recorded?;
        Ok(compiled)
    }

    pub(crate) fn reset_upload_ring(&mut self) {
        self.upload.reset();
    }
}

impl std::fmt::Debug for FrameResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameResource")
            .field("index", &self.index)
            .field("fence_value", &self.fence_value)
            .field("has_bundle", &self.bundle.is_some())
            .field("upload", &self.upload)
            .finish()
    }
}
