//! Submission queues and their fences.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{FenceId, GpuBackend, QueueId};
use crate::error::{GraphicsError, GraphicsResult};
use crate::profiling::profile_scope;
use crate::types::{CommandListType, QueueType};

use super::CompiledCommandList;

/// A hardware submission queue with one monotonically increasing fence.
///
/// Every [`add_signal`](Self::add_signal) reserves the next fence value, so
/// values on one queue are never reused and follow submission order. A value
/// is complete once the fence's completed value is at least that value.
///
/// ```text
/// add_signal() -> 1   add_signal() -> 2   add_signal() -> 3
///      |                   |                   |
/// GPU: [work A] signal 1   [work B] signal 2   [work C] signal 3
///                                     ^
///                            completed_value() == 2
/// ```
pub struct CommandQueue {
    backend: Arc<dyn GpuBackend>,
    id: QueueId,
    queue_type: QueueType,
    fence: FenceId,
    /// Next value to signal. Guarded so submissions and signals from several
    /// threads reach the native queue in the order of their values.
    next_fence_value: Mutex<u64>,
}

impl CommandQueue {
    /// Create a queue and its fence.
    pub fn new(backend: Arc<dyn GpuBackend>, queue_type: QueueType) -> GraphicsResult<Self> {
        let id = backend.create_queue(queue_type)?;
        let fence = match backend.create_fence(0) {
            Ok(fence) => fence,
            Err(e) => {
                backend.destroy_queue(id);
                return Err(e);
            }
        };
        log::debug!("Created {queue_type:?} queue {id:?} with fence {fence:?}");
        Ok(Self {
            backend,
            id,
            queue_type,
            fence,
            next_fence_value: Mutex::new(1),
        })
    }

    /// Get the native queue id.
    pub fn native_id(&self) -> QueueId {
        self.id
    }

    /// Get the native fence id.
    pub fn fence_id(&self) -> FenceId {
        self.fence
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Enqueue a fence write after all work submitted so far and return its
    /// value. Does not block.
    pub fn add_signal(&self) -> GraphicsResult<u64> {
        let mut next = self.next_fence_value.lock();
        let value = *next;
        self.backend.signal(self.id, self.fence, value)?;
        *next += 1;
        log::trace!("{:?} queue signaled {value}", self.queue_type);
        Ok(value)
    }

    /// The most recently reserved fence value, or 0 if nothing was signaled.
    pub fn last_signaled_value(&self) -> u64 {
        *self.next_fence_value.lock() - 1
    }

    /// The last fence value the GPU reached.
    pub fn completed_value(&self) -> GraphicsResult<u64> {
        self.backend.fence_completed_value(self.fence)
    }

    /// Whether the GPU reached `value`.
    pub fn is_complete(&self, value: u64) -> GraphicsResult<bool> {
        Ok(self.completed_value()? >= value)
    }

    fn check_signaled(&self, value: u64) -> GraphicsResult<()> {
        let last = self.last_signaled_value();
        if value > last {
            return Err(GraphicsError::InvalidParameter(format!(
                "fence value {value} was never signaled on the {:?} queue (last {last})",
                self.queue_type
            )));
        }
        Ok(())
    }

    /// Block until the GPU reaches `value`.
    ///
    /// Returns immediately if the value is already complete. Waiting on a
    /// value that was never signaled is an error, since it could never
    /// complete.
    pub fn wait_for_signal(&self, value: u64) -> GraphicsResult<()> {
        self.check_signaled(value)?;
        if self.is_complete(value)? {
            return Ok(());
        }
        profile_scope!("wait_for_signal");
        log::trace!("{:?} queue waiting for fence value {value}", self.queue_type);
        self.backend.wait_for_fence(self.fence, value)
    }

    /// Block until the GPU reaches `value` or `timeout` elapses.
    ///
    /// Returns `true` if the value was reached.
    pub fn wait_for_signal_timeout(&self, value: u64, timeout: Duration) -> GraphicsResult<bool> {
        self.check_signaled(value)?;
        if self.is_complete(value)? {
            return Ok(true);
        }
        profile_scope!("wait_for_signal_timeout");
        self.backend
            .wait_for_fence_timeout(self.fence, value, timeout)
    }

    fn check_submittable(&self, list: &CompiledCommandList) -> GraphicsResult<()> {
        match list.list_type().queue_type() {
            Some(queue_type) if queue_type == self.queue_type => Ok(()),
            Some(queue_type) => Err(GraphicsError::InvalidParameter(format!(
                "{queue_type:?} command list submitted to the {:?} queue",
                self.queue_type
            ))),
            None => Err(GraphicsError::InvalidParameter(
                "bundles can only be executed from another command list".into(),
            )),
        }
    }

    fn submit(&self, lists: &[&CompiledCommandList]) -> GraphicsResult<()> {
        for list in lists {
            self.check_submittable(list)?;
        }
        let ids: Vec<_> = lists.iter().map(|list| list.native_id()).collect();
        // Held so a concurrent add_signal cannot slip between submissions.
        let _order = self.next_fence_value.lock();
        self.backend.execute_command_lists(self.id, &ids)
    }

    /// Submit one closed list without waiting for it.
    pub fn execute_command_list(&self, list: &CompiledCommandList) -> GraphicsResult<()> {
        profile_scope!("execute_command_list");
        self.submit(&[list])
    }

    /// Submit a batch, signal, and block until the GPU finished it.
    ///
    /// Returns the fence value that marks the batch.
    pub fn execute_command_lists(&self, lists: &[&CompiledCommandList]) -> GraphicsResult<u64> {
        profile_scope!("execute_command_lists");
        self.submit(lists)?;
        let value = self.add_signal()?;
        self.wait_for_signal(value)?;
        Ok(value)
    }

    /// Make this queue wait on the GPU until `other` reaches `value`.
    ///
    /// The CPU does not block.
    pub fn wait_on(&self, other: &CommandQueue, value: u64) -> GraphicsResult<()> {
        other.check_signaled(value)?;
        log::trace!(
            "{:?} queue waits for {:?} queue value {value}",
            self.queue_type,
            other.queue_type
        );
        self.backend.queue_wait(self.id, other.fence, value)
    }

    /// Signal and wait until every prior submission finished.
    pub fn flush(&self) -> GraphicsResult<()> {
        let value = self.add_signal()?;
        self.wait_for_signal(value)
    }

    /// Command list type accepted by this queue.
    pub fn list_type(&self) -> CommandListType {
        self.queue_type.list_type()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.fence);
        self.backend.destroy_queue(self.id);
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.id)
            .field("queue_type", &self.queue_type)
            .field("last_signaled", &self.last_signaled_value())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandQueue: Send, Sync);
