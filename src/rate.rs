//! Throughput and ETA estimation.
//!
//! A [`RateEstimator`] keeps a bounded window of `(timestamp, count)` samples for a
//! single task. The rate is the slope between the oldest and newest sample in the
//! window, which smooths out bursty updates without remembering the whole history.
//!
//! # Window
//!
//! The window holds a fixed number of samples ([`DEFAULT_WINDOW`] unless
//! configured). When it is full the oldest sample is evicted.
//!
//! # Clock Regressions
//!
//! A sample stamped *earlier* than the newest one already recorded means the clock
//! went backwards. The window is restarted from that sample, so the rate reads as
//! unknown until a later sample arrives. A negative rate or ETA is never produced.

use std::{collections::VecDeque, time::Duration};

use web_time::Instant;

/// Number of samples retained by [`RateEstimator::new`].
pub const DEFAULT_WINDOW: usize = 32;

/// Sliding-window throughput estimator, owned by exactly one task.
#[derive(Clone, Debug)]
pub struct RateEstimator {
    samples: VecDeque<(Instant, u64)>,
    capacity: usize,
}

impl RateEstimator {
    /// Creates an estimator holding up to [`DEFAULT_WINDOW`] samples.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Creates an estimator holding up to `capacity` samples (at least two).
    #[must_use]
    pub fn with_window(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records the cumulative `count` observed at instant `at`.
    pub fn record(&mut self, at: Instant, count: u64) {
        let regressed = self.samples.back().is_some_and(|&(last, _)| at < last);
        if regressed {
            self.samples.clear();
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, count));
    }

    /// Number of samples currently in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no sample has been recorded since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drops every sample.
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// Items per second across the window.
    ///
    /// Returns `None` with fewer than two samples, or when the window spans no time.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let &(first_at, first_count) = self.samples.front()?;
        let &(last_at, last_count) = self.samples.back()?;

        let secs = last_at.checked_duration_since(first_at)?.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        Some(last_count.saturating_sub(first_count) as f64 / secs)
    }

    /// Time left to process `remaining` items at the current rate.
    ///
    /// Returns `None` when the rate is unknown or zero.
    #[must_use]
    pub fn eta(&self, remaining: f64) -> Option<Duration> {
        let rate = self.rate()?;
        if rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining.max(0.0) / rate).ok()
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}
