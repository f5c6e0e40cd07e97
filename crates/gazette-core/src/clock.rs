//! Injected time source, so due-time logic and token expiry never read the
//! wall clock directly.

use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{Error, Result};

/// `now` minus `days` whole days, or an error when that falls outside the
/// representable range.
pub fn days_before(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
  TimeDelta::try_days(i64::from(days))
    .and_then(|span| now.checked_sub_signed(span))
    .ok_or(Error::DaysOutOfRange(days))
}

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
  now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
  pub fn new(now: DateTime<Utc>) -> Self { Self { now: Mutex::new(now) } }

  pub fn set(&self, now: DateTime<Utc>) {
    *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
  }

  pub fn advance(&self, by: TimeDelta) {
    let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *guard += by;
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn days_before_rejects_spans_past_the_calendar() {
    let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
    assert_eq!(days_before(now, 3).unwrap(), Utc.with_ymd_and_hms(2024, 5, 31, 8, 0, 0).unwrap());
    assert_eq!(days_before(now, 0).unwrap(), now);
    assert!(matches!(days_before(now, u32::MAX), Err(Error::DaysOutOfRange(u32::MAX))));
  }
}
