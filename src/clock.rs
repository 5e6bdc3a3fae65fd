// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Monotonic time sources.
//!
//! Capture timestamps, transport position and trigger diagnostics all read time
//! through [`Clock`], so the whole timing path can be driven by a fake clock.

use std::sync::Arc;
use std::time::Duration;

/// A monotonic clock. `now` is the time elapsed since the clock was created.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Converts fractional milliseconds to a duration, rounded to the nanosecond.
pub fn millis(ms: f64) -> Duration {
    if !ms.is_finite() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((ms * 1_000_000.0).round() as u64)
}

/// Converts a duration to fractional milliseconds.
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// The wall clock used in production.
pub struct SystemClock {
    #[cfg(not(feature = "quanta"))]
    origin: std::time::Instant,
    #[cfg(feature = "quanta")]
    clock: quanta::Clock,
    #[cfg(feature = "quanta")]
    origin: quanta::Instant,
}

impl SystemClock {
    #[cfg(not(feature = "quanta"))]
    pub fn new() -> SystemClock {
        SystemClock {
            origin: std::time::Instant::now(),
        }
    }

    #[cfg(feature = "quanta")]
    pub fn new() -> SystemClock {
        let clock = quanta::Clock::new();
        let origin = clock.now();
        SystemClock { clock, origin }
    }

    /// Returns a shareable system clock.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(SystemClock::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[cfg(not(feature = "quanta"))]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    #[cfg(feature = "quanta")]
    fn now(&self) -> Duration {
        self.clock.now().duration_since(self.origin)
    }
}

/// A clock that only moves when told to.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<parking_lot::Mutex<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock::default()
    }

    /// Moves the clock forward by the given number of milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        *self.now.lock() += Duration::from_millis(ms);
    }

    /// Sets the clock to an absolute time in milliseconds.
    pub fn set_ms(&self, ms: u64) {
        *self.now.lock() = Duration::from_millis(ms);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}
