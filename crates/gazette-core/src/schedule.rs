//! The schedule evaluator: decides whether a digest is due for a new run.
//!
//! Pure in `(now, schedule, last run)`. The caller supplies the current time
//! and the creation time of the digest's latest run, read from live state on
//! every tick, so two evaluations in the same minute cannot both fire once
//! the first one's run exists.

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, Utc, Weekday};
use chrono_tz::Tz;

use crate::{
  Error, Result,
  catalog::{DigestDef, Frequency},
};

impl Frequency {
  /// Minimum time since the last run before another may fire.
  pub fn recency_guard(self) -> TimeDelta {
    match self {
      Self::Daily => TimeDelta::hours(22),
      Self::Weekly => TimeDelta::days(6),
      Self::Monthly => TimeDelta::days(28),
    }
  }
}

/// A digest's send policy, validated and resolved against the default zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
  pub frequency:    Frequency,
  pub timezone:     Tz,
  pub send_time:    NaiveTime,
  pub day_of_week:  Weekday,
  pub day_of_month: u32,
}

impl Schedule {
  pub fn for_digest(digest: &DigestDef, default_tz: Tz) -> Result<Self> {
    let policy = &digest.send_policy;
    let invalid = |reason: String| Error::InvalidSendPolicy {
      digest_id: digest.digest_id.clone(),
      reason,
    };

    let send_time = NaiveTime::parse_from_str(policy.send_time_local.trim(), "%H:%M")
      .map_err(|_| {
        invalid(format!("send time {:?} is not HH:MM", policy.send_time_local))
      })?;

    let day_of_week = policy
      .day_of_week
      .checked_sub(1)
      .and_then(|d| Weekday::try_from(d).ok())
      .ok_or_else(|| invalid(format!("day_of_week {} is not 1-7", policy.day_of_week)))?;

    if !(1..=31).contains(&policy.day_of_month) {
      return Err(invalid(format!("day_of_month {} is not 1-31", policy.day_of_month)));
    }

    Ok(Self {
      frequency: digest.frequency,
      timezone: policy.timezone.unwrap_or(default_tz),
      send_time,
      day_of_week,
      day_of_month: policy.day_of_month,
    })
  }
}

/// Why a digest is not due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
  /// Local time has not yet reached today's send time.
  BeforeSendTime,
  WrongWeekday,
  WrongDayOfMonth,
  /// The last run is still inside the recency guard.
  RecentRun { last_run: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Due,
  NotDue(Hold),
}

impl Decision {
  pub fn is_due(self) -> bool { matches!(self, Self::Due) }
}

/// Decide whether a new run is due at `now`.
pub fn evaluate(
  now:      DateTime<Utc>,
  schedule: &Schedule,
  last_run: Option<DateTime<Utc>>,
) -> Decision {
  let local_now = now.with_timezone(&schedule.timezone);

  // Re-arms at local midnight: each evaluation compares against today's
  // send moment.
  if local_now.time() < schedule.send_time {
    return Decision::NotDue(Hold::BeforeSendTime);
  }

  match schedule.frequency {
    Frequency::Daily => {}
    Frequency::Weekly if local_now.weekday() != schedule.day_of_week => {
      return Decision::NotDue(Hold::WrongWeekday);
    }
    Frequency::Monthly if local_now.day() != schedule.day_of_month => {
      return Decision::NotDue(Hold::WrongDayOfMonth);
    }
    Frequency::Weekly | Frequency::Monthly => {}
  }

  match last_run {
    Some(last) if now - last <= schedule.frequency.recency_guard() => {
      Decision::NotDue(Hold::RecentRun { last_run: last })
    }
    _ => Decision::Due,
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn schedule(frequency: Frequency) -> Schedule {
    Schedule {
      frequency,
      timezone: chrono_tz::Europe::London,
      send_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
      day_of_week: Weekday::Mon,
      day_of_month: 1,
    }
  }

  fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
  }

  #[test]
  fn waits_for_local_send_time() {
    let s = schedule(Frequency::Daily);
    // 07:30 UTC on a BST day is 08:30 local.
    assert!(evaluate(utc(2024, 7, 2, 7, 30), &s, None).is_due());
    // 06:59 UTC is 07:59 local.
    assert_eq!(
      evaluate(utc(2024, 7, 2, 6, 59), &s, None),
      Decision::NotDue(Hold::BeforeSendTime)
    );
  }

  #[test]
  fn first_run_fires_once_eligible() {
    assert!(evaluate(utc(2024, 1, 2, 9, 0), &schedule(Frequency::Daily), None).is_due());
  }

  #[test]
  fn daily_guard_blocks_refire() {
    let s = schedule(Frequency::Daily);
    let fired = utc(2024, 1, 2, 8, 0);

    assert_eq!(
      evaluate(fired + TimeDelta::minutes(1), &s, Some(fired)),
      Decision::NotDue(Hold::RecentRun { last_run: fired })
    );
    assert!(!evaluate(fired + TimeDelta::hours(22), &s, Some(fired)).is_due());
    assert!(evaluate(fired + TimeDelta::days(1), &s, Some(fired)).is_due());
  }

  #[test]
  fn weekly_fires_only_on_configured_weekday() {
    let s = schedule(Frequency::Weekly);
    // 2024-01-01 is a Monday.
    assert!(evaluate(utc(2024, 1, 1, 9, 0), &s, None).is_due());
    assert_eq!(
      evaluate(utc(2024, 1, 2, 9, 0), &s, None),
      Decision::NotDue(Hold::WrongWeekday)
    );
    let fired = utc(2024, 1, 1, 8, 0);
    assert!(!evaluate(fired + TimeDelta::minutes(1), &s, Some(fired)).is_due());
    assert!(evaluate(utc(2024, 1, 8, 8, 0), &s, Some(fired)).is_due());
  }

  #[test]
  fn monthly_fires_only_on_configured_day() {
    let s = schedule(Frequency::Monthly);
    assert!(evaluate(utc(2024, 2, 1, 9, 0), &s, None).is_due());
    assert_eq!(
      evaluate(utc(2024, 2, 2, 9, 0), &s, None),
      Decision::NotDue(Hold::WrongDayOfMonth)
    );
    let fired = utc(2024, 2, 1, 8, 0);
    assert!(!evaluate(utc(2024, 2, 1, 23, 0), &s, Some(fired)).is_due());
    assert!(evaluate(utc(2024, 3, 1, 8, 0), &s, Some(fired)).is_due());
  }

  #[test]
  fn local_day_decides_weekday_across_zones() {
    let mut s = schedule(Frequency::Weekly);
    s.timezone = chrono_tz::Asia::Tokyo;
    // Sunday 23:30 UTC is Monday 08:30 in Tokyo.
    assert!(evaluate(utc(2023, 12, 31, 23, 30), &s, None).is_due());
  }

  #[test]
  fn send_policy_is_validated() {
    let mut digest: DigestDef = serde_json::from_str(
      r#"{"digest_id":"d","name":"D","group_id":"g","template_id":"t","frequency":"weekly"}"#,
    )
    .unwrap();
    assert!(Schedule::for_digest(&digest, Tz::UTC).is_ok());

    digest.send_policy.send_time_local = "8am".into();
    assert!(matches!(
      Schedule::for_digest(&digest, Tz::UTC),
      Err(Error::InvalidSendPolicy { .. })
    ));

    digest.send_policy.send_time_local = "08:00".into();
    digest.send_policy.day_of_week = 8;
    assert!(Schedule::for_digest(&digest, Tz::UTC).is_err());
  }
}
