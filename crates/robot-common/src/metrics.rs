//! Dispatch lateness metrics.
//!
//! Records how far past its due time each Command actually ran. Lateness is
//! expected under cooperative scheduling (an earlier Command in the same pass
//! may overrun, or the outer loop may oversleep); the ring buffer keeps the
//! recent distribution without allocating on the hot path.

use crate::time::TimeUs;
use serde::Serialize;

/// Lateness histogram with ring buffer.
#[derive(Debug)]
pub struct LatenessMetrics {
    /// Ring buffer of lateness samples in microseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total dispatches recorded.
    total_dispatches: u64,
    /// Minimum observed lateness.
    min_us: u64,
    /// Maximum observed lateness.
    max_us: u64,
    /// Sum of all lateness samples for mean calculation.
    sum_us: u64,
    /// Dispatches later than the tolerance.
    late_count: u64,
    /// Lateness above this counts as late.
    tolerance_us: u64,
}

impl LatenessMetrics {
    /// Create a new metrics collector.
    ///
    /// # Arguments
    ///
    /// * `histogram_size` - Number of samples to retain in the ring buffer.
    /// * `tolerance` - Dispatches later than this are counted as late.
    #[must_use]
    pub fn new(histogram_size: usize, tolerance: TimeUs) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_dispatches: 0,
            min_us: u64::MAX,
            max_us: 0,
            sum_us: 0,
            late_count: 0,
            tolerance_us: tolerance.get(),
        }
    }

    /// Record the lateness of one dispatch.
    pub fn record(&mut self, lateness: TimeUs) {
        let us = lateness.get();

        self.samples[self.write_pos] = us;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_dispatches += 1;
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
        self.sum_us = self.sum_us.wrapping_add(us);

        if us > self.tolerance_us {
            self.late_count += 1;
        }
    }

    /// Total dispatches recorded.
    #[must_use]
    pub fn total_dispatches(&self) -> u64 {
        self.total_dispatches
    }

    /// Dispatches whose lateness exceeded the tolerance.
    #[must_use]
    pub fn late_count(&self) -> u64 {
        self.late_count
    }

    /// Minimum observed lateness.
    #[must_use]
    pub fn min(&self) -> Option<TimeUs> {
        (self.total_dispatches > 0).then(|| TimeUs::new(self.min_us))
    }

    /// Maximum observed lateness.
    #[must_use]
    pub fn max(&self) -> Option<TimeUs> {
        (self.total_dispatches > 0).then(|| TimeUs::new(self.max_us))
    }

    /// Mean lateness.
    #[must_use]
    pub fn mean(&self) -> Option<TimeUs> {
        (self.total_dispatches > 0).then(|| TimeUs::new(self.sum_us / self.total_dispatches))
    }

    /// Compute a percentile (0.0 to 100.0) over the retained samples.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<TimeUs> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        let idx = idx.min(sorted.len() - 1);

        Some(TimeUs::new(sorted[idx]))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> LatenessSnapshot {
        LatenessSnapshot {
            total_dispatches: self.total_dispatches,
            min_us: self.min().map(TimeUs::get),
            max_us: self.max().map(TimeUs::get),
            mean_us: self.mean().map(TimeUs::get),
            late_count: self.late_count,
            sample_count: self.sample_count,
        }
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total_dispatches = 0;
        self.min_us = u64::MAX;
        self.max_us = 0;
        self.sum_us = 0;
        self.late_count = 0;
    }
}

/// Immutable snapshot of lateness metrics for reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatenessSnapshot {
    /// Total dispatches recorded.
    pub total_dispatches: u64,
    /// Minimum lateness in microseconds.
    pub min_us: Option<u64>,
    /// Maximum lateness in microseconds.
    pub max_us: Option<u64>,
    /// Mean lateness in microseconds.
    pub mean_us: Option<u64>,
    /// Dispatches beyond the tolerance.
    pub late_count: u64,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}
