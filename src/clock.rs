//! Time sources.
//!
//! The engine never reads the wall clock directly. A registry owns a [`Clock`] and
//! stamps every mutation with it, so tests can drive time by hand through
//! [`ManualClock`] instead of sleeping.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use web_time::Instant;

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Cloning shares the underlying instant, so a test can keep one clone and hand
/// the other to a registry.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Moves the clock backward, simulating a clock adjustment.
    ///
    /// Leaves the clock untouched if the earlier instant is not representable.
    pub fn rewind(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Some(earlier) = now.checked_sub(by) {
            *now = earlier;
        }
    }

    /// Pins the clock to an explicit instant.
    pub fn set(&self, instant: Instant) {
        *self.now.lock() = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Clock, ManualClock};

    #[test]
    fn test_manual_clock_moves_both_ways() {
        let clock = ManualClock::new();
        let t0 = clock.now();

        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now().duration_since(t0), Duration::from_secs(2));

        clock.rewind(Duration::from_secs(1));
        assert_eq!(clock.now().duration_since(t0), Duration::from_secs(1));

        // Clones observe the same time.
        let shared = clock.clone();
        clock.advance(Duration::from_secs(5));
        assert_eq!(shared.now(), clock.now());
    }
}
