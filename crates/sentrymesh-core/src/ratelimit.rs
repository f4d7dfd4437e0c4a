//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Small throttling helpers used to implement the "warn-throttled" and
//! "time-throttled" logging requirements scattered through spec §4
//! (once-per-90-frames read failures, once-per-5s queue warnings, etc).

use std::time::{Duration, Instant};

/// Fires once every `period` ticks. Frame-counted rather than wall-clock,
/// matching "once per 90 frames" in spec §4.1.
pub struct FrameThrottle {
    period: u64,
    count: u64,
}

impl FrameThrottle {
    pub fn new(period: u64) -> Self {
        Self {
            period: period.max(1),
            count: 0,
        }
    }

    /// Returns true on the tick that should log.
    pub fn tick(&mut self) -> bool {
        let fire = self.count % self.period == 0;
        self.count += 1;
        fire
    }
}

/// Fires at most once per wall-clock `interval`, matching "once per 5 s"
/// style throttles in spec §4.3.
pub struct TimeThrottle {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl TimeThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last_fired {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }
}
