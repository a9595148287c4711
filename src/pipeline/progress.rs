//! Overall progress bookkeeping.
//!
//! 0-20% covers download, planning and model load, 20-90% the chunks,
//! 90-100% finalization. Reported values never go backwards.

use crate::defaults::{PROGRESS_CHUNKS_SPAN, PROGRESS_CHUNKS_START, PROGRESS_DONE};

#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: f32,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp `percent` into 0..=100 and never below the previous report.
    pub fn advance(&mut self, percent: f32) -> f32 {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, PROGRESS_DONE)
        } else {
            self.last
        };
        self.last = self.last.max(percent);
        self.last
    }

    pub fn current(&self) -> f32 {
        self.last
    }
}

/// Progress at the start of chunk `index` out of `total`.
pub fn chunk_percent(index: usize, total: usize) -> f32 {
    if total == 0 {
        return PROGRESS_CHUNKS_START;
    }
    PROGRESS_CHUNKS_START + (index as f32 / total as f32) * PROGRESS_CHUNKS_SPAN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_never_decreases() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.advance(20.0), 20.0);
        assert_eq!(tracker.advance(10.0), 20.0);
        assert_eq!(tracker.advance(43.3), 43.3);
        assert_eq!(tracker.current(), 43.3);
    }

    #[test]
    fn advance_clamps_out_of_range() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.advance(-5.0), 0.0);
        assert_eq!(tracker.advance(250.0), 100.0);
        assert_eq!(tracker.advance(f32::NAN), 100.0);
    }

    #[test]
    fn chunk_percent_spans_20_to_90() {
        assert_eq!(chunk_percent(0, 3), 20.0);
        assert!((chunk_percent(1, 3) - 43.333_332).abs() < 1e-3);
        assert!(chunk_percent(2, 3) < 90.0);
        assert_eq!(chunk_percent(4, 4), 90.0);
        assert_eq!(chunk_percent(0, 0), 20.0);
    }
}
