//! Retention pruning and engagement reporting.

use chrono::{DateTime, Utc};
use gazette_core::{
  clock::days_before,
  model::{PruneStats, ReportCounts},
  store::DigestStore,
};

use crate::{Error, Result};

/// Delete engagement events, snapshots, and content units older than
/// `retention_days`. Runs, run items, and delivery records are kept.
pub async fn prune<S: DigestStore>(
  store:          &S,
  now:            DateTime<Utc>,
  retention_days: u32,
) -> Result<PruneStats> {
  let cutoff = days_before(now, retention_days)?;
  let stats = store.prune(cutoff).await.map_err(Error::store)?;
  tracing::info!(
    %cutoff,
    events = stats.events,
    snapshots = stats.snapshots,
    items = stats.items,
    "pruned"
  );
  Ok(stats)
}

/// Counts for `digest_id` over the trailing `days`.
pub async fn report<S: DigestStore>(
  store:     &S,
  digest_id: &str,
  now:       DateTime<Utc>,
  days:      u32,
) -> Result<ReportCounts> {
  let since = days_before(now, days)?;
  store.report(digest_id.to_owned(), since).await.map_err(Error::store)
}

#[cfg(test)]
mod tests {
  use chrono::{TimeDelta, TimeZone};
  use gazette_core::{
    Error as CoreError,
    content::ContentUnit,
    delivery::FAILURE_THRESHOLD,
    model::{DeliveryAttempt, NewRun},
  };
  use gazette_store_sqlite::SqliteStore;

  use super::*;

  fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap() }

  fn unit(n: u32, ingested_at: DateTime<Utc>) -> ContentUnit {
    ContentUnit {
      source_id: "feed".into(),
      title: format!("t{n}"),
      body_text: String::new(),
      url: None,
      published_at: None,
      ingested_at,
      links: vec![],
      fingerprint: format!("fp{n}"),
    }
  }

  #[tokio::test]
  async fn prune_uses_the_retention_window() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store
      .insert_units(vec![unit(1, t0() - TimeDelta::days(50)), unit(2, t0() - TimeDelta::days(5))])
      .await
      .unwrap();

    let stats = prune(&store, t0(), 45).await.unwrap();
    assert_eq!(stats.items, 1);
    let left = store
      .units_in_window(vec!["feed".into()], t0() - TimeDelta::days(100), t0())
      .await
      .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].unit.fingerprint, "fp2");
  }

  #[tokio::test]
  async fn report_counts_recent_runs_only() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    for (days_ago, recipient) in [(10, "old@x.test"), (1, "new@x.test")] {
      let at = t0() - TimeDelta::days(days_ago);
      let run = store
        .create_run(NewRun {
          digest_id:    "daily".into(),
          period_start: at,
          period_end:   at,
          created_at:   at,
        })
        .await
        .unwrap();
      store
        .record_delivery(DeliveryAttempt::pending(run.id, recipient, at).sent("m"), FAILURE_THRESHOLD)
        .await
        .unwrap();
    }

    let counts = report(&store, "daily", t0(), 7).await.unwrap();
    assert_eq!(counts.runs, 1);
    assert_eq!(counts.sent, 1);
    assert_eq!(counts.failed, 0);
  }

  #[tokio::test]
  async fn windows_past_the_calendar_are_errors() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store.insert_units(vec![unit(1, t0() - TimeDelta::days(50))]).await.unwrap();

    let err = prune(&store, t0(), u32::MAX).await.unwrap_err();
    assert!(matches!(err, Error::Core(CoreError::DaysOutOfRange(u32::MAX))));
    let err = report(&store, "daily", t0(), u32::MAX).await.unwrap_err();
    assert!(matches!(err, Error::Core(CoreError::DaysOutOfRange(u32::MAX))));

    // Nothing was pruned.
    let left = store
      .units_in_window(vec!["feed".into()], t0() - TimeDelta::days(100), t0())
      .await
      .unwrap();
    assert_eq!(left.len(), 1);
  }
}
