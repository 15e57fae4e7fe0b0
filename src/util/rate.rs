use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{Bitrate, DataSize};

/// Sliding-window estimate of a send rate.
///
/// Every sent packet is recorded with the time it left; the rate at any later
/// instant is the sum of the sizes inside the window divided by the window
/// length.
#[derive(Debug)]
pub struct BitrateTracker {
    window: Duration,
    history: VecDeque<(Instant, DataSize)>,
    total: DataSize,
}

impl BitrateTracker {
    /// Create a tracker averaging over `window`.
    ///
    /// Panics if the window is zero.
    pub fn new(window: Duration) -> Self {
        assert!(!window.is_zero(), "bitrate window must be non-zero");
        BitrateTracker {
            window,
            history: VecDeque::new(),
            total: DataSize::ZERO,
        }
    }

    /// Record `size` bytes leaving at `now`.
    ///
    /// Times are expected to be non-decreasing between calls.
    pub fn record(&mut self, now: Instant, size: DataSize) {
        self.purge(now);
        self.total += size;
        self.history.push_back((now, size));
    }

    /// Instantaneous bitrate at `now`.
    pub fn rate(&mut self, now: Instant) -> Bitrate {
        self.purge(now);
        self.total / self.window
    }

    /// Bytes inside the window as of the last call.
    pub fn total(&self) -> DataSize {
        self.total
    }

    /// The averaging window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn purge(&mut self, now: Instant) {
        while let Some((t, size)) = self.history.front() {
            if now.saturating_duration_since(*t) <= self.window {
                break;
            }
            self.total -= *size;
            self.history.pop_front();
        }
    }
}
