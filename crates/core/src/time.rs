//! Monotonic wall-clock timestamps.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Wall-clock source that never moves backwards within a process.
///
/// Business timestamps on events are caller-set; handlers use this clock so
/// that events emitted by one process are strictly ordered in time even when
/// the OS clock steps backwards.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Current time, nudged forward by 1µs if the OS clock stalled or stepped back.
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let mut candidate = Utc::now();
        if candidate <= *last {
            candidate = *last + Duration::microseconds(1);
        }
        *last = candidate;
        candidate
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }
}
