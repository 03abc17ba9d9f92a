//! Queue fences and the copy queue's submission bookkeeping
//!
//! # Queue Layout
//!
//! ```text
//! graphics: [frame N: upload? dispatch barrier] signal(N+1)
//! copy:        [upload ring copy] signal(c)  [fast batch] signal(c+1)
//!                                  \
//!                                   graphics waits on c (standard path only)
//! ```
//!
//! The standard upload path makes the graphics queue wait for its copy
//! before the next graphics submission. Background uploads and the fast
//! batch never add a wait, so the graphics queue may read a destination
//! buffer while the copy queue is still writing it.

use crate::device::BufferId;
use tracing::trace;

/// Monotonic fence of one queue
#[derive(Debug)]
pub struct QueueFence {
    name: &'static str,
    last_signaled: u64,
    completed: u64,
}

impl QueueFence {
    /// Create a fence whose value 0 is already complete
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            last_signaled: 0,
            completed: 0,
        }
    }

    /// Queue name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Allocate the next signal value
    pub fn signal(&mut self) -> u64 {
        self.last_signaled += 1;
        trace!("{} fence signal {}", self.name, self.last_signaled);
        self.last_signaled
    }

    /// Mark every value up to `value` as reached
    pub fn complete(&mut self, value: u64) {
        debug_assert!(
            value <= self.last_signaled,
            "{} fence completed {} past last signal {}",
            self.name,
            value,
            self.last_signaled
        );
        self.completed = self.completed.max(value);
    }

    /// Last value the GPU reached
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Last value handed out by [`signal`](Self::signal)
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// Whether `value` has been reached
    pub fn is_complete(&self, value: u64) -> bool {
        value <= self.completed
    }

    /// Whether signalled work is still outstanding
    pub fn is_idle(&self) -> bool {
        self.completed == self.last_signaled
    }
}

/// A buffer-to-buffer copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    /// Source buffer
    pub src: BufferId,
    /// Source byte offset
    pub src_offset: u64,
    /// Destination buffer
    pub dst: BufferId,
    /// Destination byte offset
    pub dst_offset: u64,
    /// Bytes to copy
    pub size: u64,
}

/// Copies collected during a frame for the fast upload path
#[derive(Debug, Default)]
pub struct FastUploadBatch {
    regions: Vec<CopyRegion>,
    bytes: u64,
}

impl FastUploadBatch {
    /// Add a copy to the batch
    pub fn push(&mut self, region: CopyRegion) {
        self.bytes += region.size;
        self.regions.push(region);
    }

    /// Take every queued copy, leaving the batch empty
    pub fn drain(&mut self) -> Vec<CopyRegion> {
        self.bytes = 0;
        std::mem::take(&mut self.regions)
    }

    /// Number of queued copies
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Total bytes queued
    pub fn total_bytes(&self) -> u64 {
        self.bytes
    }
}

/// Statistics for copy queue usage
#[derive(Debug, Default, Clone)]
pub struct QueueStatistics {
    pub submissions: u64,
    pub fast_batches: u64,
    pub bytes_copied: u64,
    pub graphics_waits: u64,
}

/// Copy queue state shared by the upload ring and the fast batch
#[derive(Debug)]
pub struct CopyQueue {
    fence: QueueFence,
    fast_batch: FastUploadBatch,
    graphics_wait: Option<u64>,
    statistics: QueueStatistics,
}

impl Default for CopyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyQueue {
    /// Create an idle copy queue
    pub fn new() -> Self {
        Self {
            fence: QueueFence::new("copy"),
            fast_batch: FastUploadBatch::default(),
            graphics_wait: None,
            statistics: QueueStatistics::default(),
        }
    }

    /// Queue fence
    pub fn fence(&self) -> &QueueFence {
        &self.fence
    }

    /// Mutable queue fence
    pub fn fence_mut(&mut self) -> &mut QueueFence {
        &mut self.fence
    }

    /// Signal a submission of `bytes`, optionally making graphics wait on it
    pub fn submit(&mut self, bytes: u64, sync_on_graphics_queue: bool) -> u64 {
        let value = self.fence.signal();
        self.statistics.submissions += 1;
        self.statistics.bytes_copied += bytes;
        if sync_on_graphics_queue {
            self.graphics_wait = Some(self.graphics_wait.map_or(value, |w| w.max(value)));
        }
        value
    }

    /// Queue a copy for the next fast batch
    pub fn queue_fast(&mut self, region: CopyRegion) {
        self.fast_batch.push(region);
    }

    /// Take the pending fast batch, if any
    pub fn take_fast_batch(&mut self) -> Option<Vec<CopyRegion>> {
        if self.fast_batch.is_empty() {
            return None;
        }
        self.statistics.fast_batches += 1;
        Some(self.fast_batch.drain())
    }

    /// Number of copies waiting in the fast batch
    pub fn pending_fast_uploads(&self) -> usize {
        self.fast_batch.len()
    }

    /// Take the fence value graphics must wait on before its next submission
    pub fn take_graphics_wait(&mut self) -> Option<u64> {
        let wait = self.graphics_wait.take();
        if wait.is_some() {
            self.statistics.graphics_waits += 1;
        }
        wait
    }

    /// Get current statistics
    pub fn statistics(&self) -> QueueStatistics {
        self.statistics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(size: u64) -> CopyRegion {
        CopyRegion {
            src: BufferId(1),
            src_offset: 0,
            dst: BufferId(2),
            dst_offset: 0,
            size,
        }
    }

    #[test]
    fn test_fence_progress() {
        let mut fence = QueueFence::new("graphics");
        assert!(fence.is_idle());
        let v = fence.signal();
        assert_eq!(v, 1);
        assert!(!fence.is_complete(1));
        fence.complete(1);
        assert!(fence.is_complete(1));
        assert!(fence.is_idle());
    }

    #[test]
    fn test_standard_submit_requests_graphics_wait() {
        let mut queue = CopyQueue::new();
        let a = queue.submit(64, true);
        let b = queue.submit(64, true);
        assert_eq!(queue.take_graphics_wait(), Some(b));
        assert!(b > a);
        assert_eq!(queue.take_graphics_wait(), None);
    }

    #[test]
    fn test_background_submit_never_waits() {
        let mut queue = CopyQueue::new();
        queue.submit(1024, false);
        assert_eq!(queue.take_graphics_wait(), None);
        assert_eq!(queue.statistics().bytes_copied, 1024);
    }

    #[test]
    fn test_fast_batch_drains_once() {
        let mut queue = CopyQueue::new();
        assert!(queue.take_fast_batch().is_none());
        queue.queue_fast(region(16));
        queue.queue_fast(region(32));
        assert_eq!(queue.pending_fast_uploads(), 2);

        let batch = queue.take_fast_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(queue.take_fast_batch().is_none());
        assert_eq!(queue.statistics().fast_batches, 1);
    }
}
