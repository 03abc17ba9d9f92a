//! Per-frame buffer copy rotation

use crate::{BenchError, Result};

/// Index of the buffer copy in use, advanced at most once per frame
///
/// A copy written by the CPU in frame `N` may still be read by the GPU
/// until frame `N + len - 1` retires, so advancing twice inside one frame
/// would overwrite data in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingIndex {
    len: usize,
    current: usize,
    last_cycled: Option<u64>,
}

impl RingIndex {
    /// Ring over `len` copies, starting before the first
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            len,
            current: len - 1,
            last_cycled: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Copy most recently cycled to
    pub fn current(&self) -> usize {
        self.current
    }

    /// Advance to the next copy for `frame` and return its index
    pub fn cycle(&mut self, frame: u64) -> Result<usize> {
        let repeated = self.last_cycled == Some(frame);
        debug_assert!(!repeated, "buffer ring cycled twice in frame {frame}");
        if repeated {
            return Err(BenchError::InvalidOperation(format!(
                "buffer ring cycled twice in frame {frame}"
            )));
        }

        self.current = (self.current + 1) % self.len;
        self.last_cycled = Some(frame);
        Ok(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cycle_lands_on_zero() {
        let mut ring = RingIndex::new(2);
        assert_eq!(ring.cycle(0).unwrap(), 0);
        assert_eq!(ring.current(), 0);
    }

    #[test]
    fn test_alternates_across_frames() {
        let mut ring = RingIndex::new(2);
        let copies: Vec<usize> = (0..5).map(|frame| ring.cycle(frame).unwrap()).collect();
        assert_eq!(copies, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "cycled twice"))]
    fn test_double_cycle_rejected() {
        let mut ring = RingIndex::new(2);
        ring.cycle(7).unwrap();
        assert!(matches!(ring.cycle(7), Err(BenchError::InvalidOperation(_))));
    }

    #[test]
    fn test_single_copy_ring() {
        let mut ring = RingIndex::new(0);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.cycle(1).unwrap(), 0);
        assert_eq!(ring.cycle(2).unwrap(), 0);
    }
}
