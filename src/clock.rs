//! Wall clock abstraction
//!
//! Every SLA and fetch-window computation reads time through a [`Clock`] so
//! that scheduling decisions can be replayed deterministically.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// # Determinism Contract
/// - `now()` returns the last value set, never system time
/// - `advance()` only moves forward
#[derive(Debug)]
pub struct ManualClock {
    current: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(start),
        }
    }

    /// Move the clock forward by `delta`. Negative deltas are ignored.
    pub fn advance(&self, delta: Duration) {
        if delta < Duration::zero() {
            return;
        }
        let mut now = self.current.write();
        *now += delta;
    }

    pub fn advance_hours(&self, hours: f64) {
        self.advance(Duration::milliseconds((hours * 3_600_000.0).round() as i64));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.write() = to;
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        *self.current.read()
    }
}

/// Fractional hours between two instants (negative if `to` precedes `from`).
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
