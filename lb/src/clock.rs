//! Time source used by the stores
//!
//! Expiry, audit and prune decisions all read "now" through [`Clock`] so they
//! can be driven by simulated time.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::error::{CoordError, CoordResult};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for simulations and tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// The wall clock as a shared handle
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// `count` minutes, or a validation error naming `what` when out of range
pub fn minutes(count: i64, what: &str) -> CoordResult<Duration> {
    span(Duration::try_minutes(count), count, "minutes", what)
}

pub fn hours(count: i64, what: &str) -> CoordResult<Duration> {
    span(Duration::try_hours(count), count, "hours", what)
}

pub fn days(count: i64, what: &str) -> CoordResult<Duration> {
    span(Duration::try_days(count), count, "days", what)
}

fn span(duration: Option<Duration>, count: i64, unit: &str, what: &str) -> CoordResult<Duration> {
    duration.ok_or_else(|| CoordError::validation(format!("{} of {} {} is out of range", what, count, unit)))
}

/// `from + by`, rejecting instants chrono cannot represent
pub fn later(from: DateTime<Utc>, by: Duration) -> CoordResult<DateTime<Utc>> {
    from.checked_add_signed(by)
        .ok_or_else(|| CoordError::validation(format!("{} after {} is out of range", by, from)))
}

/// `from - by`, rejecting instants chrono cannot represent
pub fn earlier(from: DateTime<Utc>, by: Duration) -> CoordResult<DateTime<Utc>> {
    from.checked_sub_signed(by)
        .ok_or_else(|| CoordError::validation(format!("{} before {} is out of range", by, from)))
}
