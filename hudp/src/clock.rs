//! Monotonic millisecond clock.

use std::time::{Duration, Instant};

/// Monotonic clock anchored at transport construction.
///
/// All engine bookkeeping uses whole milliseconds since the anchor. The wire
/// timestamp is the same reading truncated to 32 bits, so it wraps after
/// roughly 49 days; peers treat it as opaque.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was created.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Wire timestamp: `now_ms` truncated to 32 bits.
    pub fn wire_ts(&self) -> u32 {
        self.now_ms() as u32
    }

    /// The `Instant` corresponding to a millisecond reading, for timer arming.
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.origin + Duration::from_millis(ms)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone() {
        let clock = Clock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn wire_ts_is_truncation() {
        let clock = Clock::new();
        let ms = clock.now_ms();
        let ts = clock.wire_ts();
        // Both readings taken within the same few ms of a fresh clock.
        assert!((ts as u64) >= ms && (ts as u64) < ms + 1000);
    }

    #[test]
    fn instant_round_trips() {
        let clock = Clock::new();
        let at = clock.instant_at(250);
        assert_eq!(at.duration_since(clock.instant_at(0)), Duration::from_millis(250));
    }
}
