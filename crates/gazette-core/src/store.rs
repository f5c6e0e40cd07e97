//! The `DigestStore` trait.
//!
//! Implemented by storage backends (e.g. `gazette-store-sqlite`). The
//! pipelines in `gazette` and the tracking endpoints in `gazette-tracking`
//! depend on this abstraction, not on any concrete backend.
//!
//! Every mutating method is one atomic unit: it either takes full effect or
//! none. Uniqueness conflicts (a duplicate fingerprint, a second delivery for
//! the same run and recipient) are reported as "already exists", never as
//! errors.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  catalog::{GroupDef, SourceDef},
  content::{ContentUnit, StoredUnit},
  model::{
    DeliveryAttempt, DeliveryRecord, DigestRun, EngagementEvent, GroupMember, NewRun,
    PruneStats, RecordedDelivery, ReportCounts, RunItem, RunStatus, Snapshot, Source,
  },
};

// ─── Supporting types ────────────────────────────────────────────────────────

/// Outcome of [`DigestStore::insert_units`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertOutcome {
  pub inserted:   usize,
  /// Units whose `(source_id, fingerprint)` was already stored.
  pub duplicates: usize,
}

/// One ranked entry handed to [`DigestStore::complete_build`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewRunItem {
  pub item:    StoredUnit,
  pub rank:    u32,
  pub summary: String,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a digest store backend.
///
/// All methods return `Send` futures so the trait can be used from the
/// multi-threaded tokio runtime behind `axum` and the scheduler.
pub trait DigestStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Sync from configuration ───────────────────────────────────────────

  /// Upsert sources. `last_polled_at` of existing sources is kept.
  fn sync_sources(
    &self,
    sources: Vec<SourceDef>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Upsert groups, recipients, and memberships. A recipient's
  /// `unsubscribed` flag is never reset; `enabled` follows the member entry
  /// only when the entry sets it.
  fn sync_groups(
    &self,
    groups: Vec<GroupDef>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Sources and content ───────────────────────────────────────────────

  fn list_sources(&self) -> impl Future<Output = Result<Vec<Source>, Self::Error>> + Send + '_;

  fn mark_polled(
    &self,
    source_id: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Insert units, skipping any whose `(source_id, fingerprint)` exists.
  fn insert_units(
    &self,
    units: Vec<ContentUnit>,
  ) -> impl Future<Output = Result<InsertOutcome, Self::Error>> + Send + '_ {
    self.commit_poll(units, Vec::new())
  }

  /// Units from `source_ids` with `ingested_at` in `[start, end]`, in
  /// insertion order.
  fn units_in_window(
    &self,
    source_ids: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<StoredUnit>, Self::Error>> + Send + '_;

  fn latest_snapshot(
    &self,
    source_id: String,
  ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send + '_;

  /// Store a poll cycle's snapshots and units in one unit: if any write
  /// fails, none of them are kept. Units are skipped on an existing
  /// `(source_id, fingerprint)` as in [`insert_units`](Self::insert_units).
  fn commit_poll(
    &self,
    units: Vec<ContentUnit>,
    snapshots: Vec<Snapshot>,
  ) -> impl Future<Output = Result<InsertOutcome, Self::Error>> + Send + '_;

  // ── Runs ──────────────────────────────────────────────────────────────

  /// Persist a run with status `created`.
  fn create_run(
    &self,
    run: NewRun,
  ) -> impl Future<Output = Result<DigestRun, Self::Error>> + Send + '_;

  /// Insert the run's items and move it to `built`, atomically.
  fn complete_build(
    &self,
    run_id: i64,
    items: Vec<NewRunItem>,
  ) -> impl Future<Output = Result<DigestRun, Self::Error>> + Send + '_;

  fn get_run(
    &self,
    run_id: i64,
  ) -> impl Future<Output = Result<Option<DigestRun>, Self::Error>> + Send + '_;

  /// The most recently created run of a digest, if any.
  fn latest_run(
    &self,
    digest_id: String,
  ) -> impl Future<Output = Result<Option<DigestRun>, Self::Error>> + Send + '_;

  /// The run's items in rank order.
  fn run_items(
    &self,
    run_id: i64,
  ) -> impl Future<Output = Result<Vec<RunItem>, Self::Error>> + Send + '_;

  /// Move a run forward. Fails if `status` is not ahead of the current one.
  fn advance_run(
    &self,
    run_id: i64,
    status: RunStatus,
  ) -> impl Future<Output = Result<DigestRun, Self::Error>> + Send + '_;

  // ── Recipients and deliveries ─────────────────────────────────────────

  /// Members of a group in membership order, with their recipient state.
  fn group_members(
    &self,
    group_id: String,
  ) -> impl Future<Output = Result<Vec<GroupMember>, Self::Error>> + Send + '_;

  fn find_delivery(
    &self,
    run_id: i64,
    recipient: String,
  ) -> impl Future<Output = Result<Option<DeliveryRecord>, Self::Error>> + Send + '_;

  /// Persist a terminal delivery attempt. In the same unit: on failure,
  /// count the recipient's failed deliveries across all runs and disable the
  /// recipient once the count reaches `failure_threshold`. A record already
  /// present for the run and recipient is left untouched.
  fn record_delivery(
    &self,
    attempt: DeliveryAttempt,
    failure_threshold: u32,
  ) -> impl Future<Output = Result<RecordedDelivery, Self::Error>> + Send + '_;

  /// Permanently exclude a recipient from delivery. Returns `false` if no
  /// such recipient exists.
  fn unsubscribe(
    &self,
    email: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Engagement ────────────────────────────────────────────────────────

  fn record_event(
    &self,
    event: EngagementEvent,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Maintenance ───────────────────────────────────────────────────────

  /// Delete events, snapshots, and content units older than `cutoff`.
  fn prune(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<PruneStats, Self::Error>> + Send + '_;

  /// Counts for runs of `digest_id` created at or after `since`.
  fn report(
    &self,
    digest_id: String,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<ReportCounts, Self::Error>> + Send + '_;
}
