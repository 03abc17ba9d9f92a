//! Upload ring for copy-queue transfers
//!
//! CPU-written staging memory for copy-queue uploads comes from a single
//! ring of upload-heap memory. Each `upload_begin` carves a contiguous block
//! out of the ring; the block belongs to a submission that is retired once
//! the copy queue's fence passes the value the submission was signalled with.
//!
//! # Allocation
//!
//! ```text
//! [ retired | sub 3 | sub 4 | free ........ | sub 1 | sub 2 ]
//!           ^tail                   ^head
//! ```
//!
//! Submissions retire strictly in order. A request that does not fit before
//! the end of the ring skips the tail gap and starts again at offset 0; the
//! skipped bytes are charged to that submission until it retires.

use crate::{Error, Result};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Configuration for the upload ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRingConfig {
    /// Initial ring capacity in bytes
    pub capacity: u64,

    /// Maximum number of submissions in flight
    pub max_submissions: usize,
}

impl Default for UploadRingConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
            max_submissions: 16,
        }
    }
}

impl UploadRingConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidOperation(
                "upload ring capacity must be > 0".to_string(),
            ));
        }

        if self.max_submissions == 0 {
            return Err(Error::InvalidOperation(
                "upload ring max_submissions must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Statistics for upload ring usage
#[derive(Debug, Default, Clone)]
pub struct UploadRingStatistics {
    pub allocations: u64,
    pub retired: u64,
    pub resizes: u64,
    pub bytes_uploaded: u64,
    pub peak_used: u64,
}

/// A block handed out by [`UploadRing::allocate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingAllocation {
    /// Submission id, used to close the submission
    pub submission: u64,
    /// Byte offset inside the ring
    pub offset: u64,
    /// Usable size
    pub size: u64,
}

#[derive(Debug)]
struct Submission {
    id: u64,
    offset: u64,
    size: u64,
    padding: u64,
    fence_value: Option<u64>,
}

/// Ring allocator over CPU-visible upload memory
pub struct UploadRing {
    config: UploadRingConfig,
    memory: Vec<u8>,
    head: u64,
    used: u64,
    next_submission: u64,
    submissions: VecDeque<Submission>,
    statistics: UploadRingStatistics,
}

impl UploadRing {
    /// Create a ring with the given configuration
    pub fn new(config: UploadRingConfig) -> Result<Self> {
        config.validate()?;

        debug!(
            "Created upload ring: {} MB, {} submissions",
            config.capacity / (1024 * 1024),
            config.max_submissions
        );

        Ok(Self {
            memory: vec![0u8; config.capacity as usize],
            config,
            head: 0,
            used: 0,
            next_submission: 0,
            submissions: VecDeque::new(),
            statistics: UploadRingStatistics::default(),
        })
    }

    /// Create a ring with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(UploadRingConfig::default())
    }

    /// Current capacity in bytes
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Bytes held by open or in-flight submissions
    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Number of submissions not yet retired
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.submissions.len()
    }

    /// Fence value of the oldest submission that still holds memory
    pub fn oldest_pending_fence(&self) -> Option<u64> {
        self.submissions.front().and_then(|s| s.fence_value)
    }

    /// Try to carve `size` bytes out of the ring
    ///
    /// Returns `Ok(None)` when the ring is momentarily full; the caller
    /// waits on [`oldest_pending_fence`](Self::oldest_pending_fence) and
    /// retires before retrying. Requests larger than the capacity need
    /// [`grow`](Self::grow) first.
    pub fn allocate(&mut self, size: u64) -> Result<Option<RingAllocation>> {
        if size == 0 {
            return Err(Error::InvalidOperation("upload of 0 bytes".to_string()));
        }
        if size > self.config.capacity {
            return Err(Error::InvalidBufferSize {
                requested: size,
                maximum: self.config.capacity,
            });
        }
        if self.submissions.len() >= self.config.max_submissions {
            trace!("Upload ring has {} submissions in flight", self.submissions.len());
            return Ok(None);
        }

        let (offset, padding) = if self.head + size > self.config.capacity {
            (0, self.config.capacity - self.head)
        } else {
            (self.head, 0)
        };

        if self.used + size + padding > self.config.capacity {
            return Ok(None);
        }

        let id = self.next_submission;
        self.next_submission += 1;
        self.used += size + padding;
        self.head = (offset + size) % self.config.capacity;
        self.submissions.push_back(Submission {
            id,
            offset,
            size,
            padding,
            fence_value: None,
        });

        self.statistics.allocations += 1;
        self.statistics.bytes_uploaded += size;
        self.statistics.peak_used = self.statistics.peak_used.max(self.used);

        trace!("Upload ring allocation {}: {} bytes at {}", id, size, offset);

        Ok(Some(RingAllocation {
            submission: id,
            offset,
            size,
        }))
    }

    /// Record the fence value the submission's copy was signalled with
    pub fn close(&mut self, submission: u64, fence_value: u64) -> Result<()> {
        let entry = self
            .submissions
            .iter_mut()
            .find(|s| s.id == submission)
            .ok_or_else(|| Error::invalid_handle("upload submission", submission))?;

        debug_assert!(entry.fence_value.is_none(), "submission {submission} closed twice");
        entry.fence_value = Some(fence_value);
        Ok(())
    }

    /// Free every closed submission whose fence value has completed
    pub fn retire(&mut self, completed_fence: u64) -> usize {
        let mut retired = 0;
        while let Some(front) = self.submissions.front() {
            match front.fence_value {
                Some(value) if value <= completed_fence => {
                    self.used -= front.size + front.padding;
                    self.submissions.pop_front();
                    retired += 1;
                }
                _ => break,
            }
        }

        if self.submissions.is_empty() {
            self.head = 0;
            self.used = 0;
        }

        self.statistics.retired += retired as u64;
        retired
    }

    /// Replace the ring memory with a larger block
    ///
    /// Only legal once every submission has retired, i.e. after a queue drain.
    pub fn grow(&mut self, min_capacity: u64) -> Result<()> {
        if !self.submissions.is_empty() {
            return Err(Error::Synchronization(format!(
                "cannot resize upload ring with {} submissions in flight",
                self.submissions.len()
            )));
        }

        let new_capacity = min_capacity.max(self.config.capacity).next_power_of_two();
        warn!(
            "Growing upload ring from {} MB to {} MB",
            self.config.capacity / (1024 * 1024),
            new_capacity / (1024 * 1024)
        );

        self.memory = vec![0u8; new_capacity as usize];
        self.config.capacity = new_capacity;
        self.head = 0;
        self.used = 0;
        self.statistics.resizes += 1;
        Ok(())
    }

    /// Write CPU data into an open allocation
    pub fn write(&mut self, allocation: &RingAllocation, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > allocation.size {
            return Err(Error::InvalidBufferSize {
                requested: end,
                maximum: allocation.size,
            });
        }

        let start = (allocation.offset + offset) as usize;
        self.memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read-only view of `size` ring bytes at `offset`
    pub fn bytes(&self, offset: u64, size: u64) -> Result<&[u8]> {
        let end = offset + size;
        if end > self.config.capacity {
            return Err(Error::InvalidBufferSize {
                requested: end,
                maximum: self.config.capacity,
            });
        }
        Ok(&self.memory[offset as usize..end as usize])
    }

    /// Get current statistics
    pub fn statistics(&self) -> UploadRingStatistics {
        self.statistics.clone()
    }
}
