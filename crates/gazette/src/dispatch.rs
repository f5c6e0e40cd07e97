//! The dispatch loop: deliver a built run to its group, at most once per
//! recipient.
//!
//! Recipients that already have a delivery record for the run are skipped,
//! whether it was sent or failed. Each attempt is written as one final
//! record, so a crash mid-loop leaves either a complete record or none.
//! Failures count towards the recipient's failure threshold; the run moves
//! to `sent` once every recipient has been processed.

use gazette_core::{
  catalog::Catalog,
  clock::Clock,
  delivery::{FAILURE_THRESHOLD, Mailer, OutgoingMessage},
  links::TrackingLinks,
  model::{DeliveryAttempt, DeliveryStatus, RunStatus},
  render::{Renderer, compose},
  store::DigestStore,
};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
  pub run_id:           i64,
  pub sent:             usize,
  pub failed:           usize,
  /// Recipients that already had a record for this run.
  pub skipped_existing: usize,
  /// Members that are disabled, unsubscribed, or not enabled in the group.
  pub skipped_inactive: usize,
  /// Recipients disabled by this dispatch.
  pub disabled:         Vec<String>,
}

pub struct Dispatcher<'a, S, M, R> {
  store:    &'a S,
  mailer:   &'a M,
  renderer: &'a R,
  links:    &'a TrackingLinks,
  clock:    &'a dyn Clock,
}

impl<'a, S, M, R> Dispatcher<'a, S, M, R>
where
  S: DigestStore,
  M: Mailer,
  R: Renderer,
{
  pub fn new(
    store:    &'a S,
    mailer:   &'a M,
    renderer: &'a R,
    links:    &'a TrackingLinks,
    clock:    &'a dyn Clock,
  ) -> Self {
    Self { store, mailer, renderer, links, clock }
  }

  /// Dispatch `run_id`. Safe to call again on a partially or fully sent
  /// run: only recipients without a record are attempted.
  pub async fn dispatch(&self, catalog: &Catalog, run_id: i64) -> Result<DispatchReport> {
    let run = self
      .store
      .get_run(run_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::RunNotFound(run_id))?;
    if run.status < RunStatus::Built {
      return Err(Error::RunNotBuilt { run_id, status: run.status });
    }

    let digest = catalog.digest(&run.digest_id)?;
    let template = catalog.template(&digest.template_id)?;
    catalog.group(&digest.group_id)?;
    self.store.sync_groups(catalog.groups.clone()).await.map_err(Error::store)?;

    let items = self.store.run_items(run.id).await.map_err(Error::store)?;
    let members = self
      .store
      .group_members(digest.group_id.clone())
      .await
      .map_err(Error::store)?;

    let mut report = DispatchReport { run_id, ..DispatchReport::default() };

    for member in &members {
      let recipient = &member.recipient;
      if !member.is_eligible() {
        report.skipped_inactive += 1;
        continue;
      }

      let existing = self
        .store
        .find_delivery(run.id, recipient.email.clone())
        .await
        .map_err(Error::store)?;
      if existing.is_some() {
        report.skipped_existing += 1;
        continue;
      }

      let now = self.clock.now();
      let ctx = compose(digest, template, &run, &items, recipient, self.links, now)?;
      let rendered = self.renderer.render(&ctx)?;
      let message = OutgoingMessage::new(&recipient.email, recipient.name.clone(), rendered);

      let pending = DeliveryAttempt::pending(run.id, &recipient.email, now);
      let attempt = match self.mailer.send(&message).await {
        Ok(message_id) => pending.sent(message_id),
        Err(e) => {
          tracing::warn!(run_id, recipient = %recipient.email, error = %e, "delivery failed");
          pending.failed(e.to_string())
        }
      };
      let status = attempt.status;

      let recorded = self
        .store
        .record_delivery(attempt, FAILURE_THRESHOLD)
        .await
        .map_err(Error::store)?;
      if !recorded.inserted {
        report.skipped_existing += 1;
        continue;
      }

      match status {
        DeliveryStatus::Sent => report.sent += 1,
        DeliveryStatus::Failed | DeliveryStatus::Pending => report.failed += 1,
      }
      if recorded.recipient_disabled {
        tracing::warn!(
          recipient = %recipient.email,
          failures = recorded.failures,
          "recipient disabled after repeated failures"
        );
        report.disabled.push(recipient.email.clone());
      }
    }

    if run.status != RunStatus::Sent {
      self
        .store
        .advance_run(run.id, RunStatus::Sent)
        .await
        .map_err(Error::store)?;
    }

    tracing::info!(
      run_id,
      sent = report.sent,
      failed = report.failed,
      skipped = report.skipped_existing,
      "dispatch complete"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::{DateTime, TimeZone, Utc};
  use gazette_core::{
    catalog::MemberDef,
    clock::FixedClock,
    content::ContentUnit,
    model::NewRun,
    token::TokenCodec,
  };
  use gazette_store_sqlite::SqliteStore;

  use super::*;
  use crate::{
    build::build_run,
    render::HtmlRenderer,
    testing::{self, RecordingMailer},
  };

  fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap() }

  struct Fixture {
    store:   SqliteStore,
    catalog: Catalog,
    links:   TrackingLinks,
    clock:   Arc<FixedClock>,
  }

  async fn fixture() -> Fixture {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store
      .insert_units(vec![ContentUnit {
        source_id:    "feed".into(),
        title:        "Item".into(),
        body_text:    "Body.".into(),
        url:          Some("https://feed.test/1".into()),
        published_at: Some(t0()),
        ingested_at:  t0(),
        links:        vec![],
        fingerprint:  "fp-1".into(),
      }])
      .await
      .unwrap();
    Fixture {
      store,
      catalog: testing::catalog(),
      links: TrackingLinks::new("https://t.test", TokenCodec::new("secret").unwrap()),
      clock: Arc::new(FixedClock::new(t0())),
    }
  }

  impl Fixture {
    async fn built_run(&self) -> i64 {
      build_run(&self.store, &testing::ShortSummarizer, &self.catalog, "daily", self.clock.now())
        .await
        .unwrap()
        .id
    }

    async fn dispatch(&self, mailer: &RecordingMailer, run_id: i64) -> Result<DispatchReport> {
      Dispatcher::new(&self.store, mailer, &HtmlRenderer, &self.links, self.clock.as_ref())
        .dispatch(&self.catalog, run_id)
        .await
    }
  }

  #[tokio::test]
  async fn sends_to_eligible_members_and_marks_run_sent() {
    let f = fixture().await;
    let run_id = f.built_run().await;
    let mailer = RecordingMailer::default();

    let report = f.dispatch(&mailer, run_id).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped_inactive, 1);
    assert_eq!(mailer.sent_to(), ["b@x.test"]);

    let run = f.store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Sent);
    let record = f.store.find_delivery(run_id, "b@x.test".into()).await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert!(record.provider_message_id.is_some());
  }

  #[tokio::test]
  async fn second_dispatch_attempts_nobody() {
    let f = fixture().await;
    let run_id = f.built_run().await;
    let failing = RecordingMailer::failing_for(&["b@x.test"]);
    let first = f.dispatch(&failing, run_id).await.unwrap();
    assert_eq!(first.failed, 1);

    // The failed recipient is not retried, even by a healthy mailer.
    let healthy = RecordingMailer::default();
    let second = f.dispatch(&healthy, run_id).await.unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(second.skipped_existing, 1);
    assert!(healthy.sent_to().is_empty());

    let record = f.store.find_delivery(run_id, "b@x.test".into()).await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("mailbox unavailable"));
  }

  #[tokio::test]
  async fn sent_run_is_not_sent_again() {
    let f = fixture().await;
    let run_id = f.built_run().await;
    let mailer = RecordingMailer::default();
    f.dispatch(&mailer, run_id).await.unwrap();
    let before = f.store.find_delivery(run_id, "b@x.test".into()).await.unwrap().unwrap();

    f.clock.advance(chrono::TimeDelta::hours(1));
    let again = f.dispatch(&mailer, run_id).await.unwrap();
    assert_eq!((again.sent, again.failed, again.skipped_existing), (0, 0, 1));
    assert_eq!(mailer.sent_to(), ["b@x.test"], "no second mailer call");

    let after = f.store.find_delivery(run_id, "b@x.test".into()).await.unwrap().unwrap();
    assert_eq!(after, before);
    let report = f.store.report("daily".into(), t0()).await.unwrap();
    assert_eq!(report.sent, 1);
    let run = f.store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Sent);
  }

  #[tokio::test]
  async fn third_failure_disables_recipient() {
    let f = fixture().await;
    let failing = RecordingMailer::failing_for(&["b@x.test"]);

    for n in 1..=3 {
      let run_id = f.built_run().await;
      let report = f.dispatch(&failing, run_id).await.unwrap();
      assert_eq!(report.failed, 1);
      assert_eq!(report.disabled.len(), usize::from(n == 3), "run {n}");
      f.clock.advance(chrono::TimeDelta::days(1));
    }

    let members = f.store.group_members("team".into()).await.unwrap();
    let b = members.iter().find(|m| m.recipient.email == "b@x.test").unwrap();
    assert!(!b.recipient.enabled);

    // The next run reaches nobody.
    let run_id = f.built_run().await;
    let report = f.dispatch(&RecordingMailer::default(), run_id).await.unwrap();
    assert_eq!(report.sent + report.failed, 0);
    assert_eq!(report.skipped_inactive, 2);
  }

  #[tokio::test]
  async fn catalog_re_enable_restores_delivery() {
    let mut f = fixture().await;
    let failing = RecordingMailer::failing_for(&["b@x.test"]);
    for _ in 0..3 {
      let run_id = f.built_run().await;
      f.dispatch(&failing, run_id).await.unwrap();
    }

    f.catalog.groups[0].members[1] =
      MemberDef { email: "b@x.test".into(), name: None, enabled: Some(true) };
    let run_id = f.built_run().await;
    let mailer = RecordingMailer::default();
    let report = f.dispatch(&mailer, run_id).await.unwrap();
    assert_eq!(report.sent, 1);
  }

  #[tokio::test]
  async fn unbuilt_and_unknown_runs_are_rejected() {
    let f = fixture().await;
    let created = f
      .store
      .create_run(NewRun {
        digest_id:    "daily".into(),
        period_start: t0(),
        period_end:   t0(),
        created_at:   t0(),
      })
      .await
      .unwrap();

    let mailer = RecordingMailer::default();
    let err = f.dispatch(&mailer, created.id).await.unwrap_err();
    assert!(matches!(err, Error::RunNotBuilt { status: RunStatus::Created, .. }));
    let err = f.dispatch(&mailer, 999).await.unwrap_err();
    assert!(matches!(err, Error::RunNotFound(999)));
    assert!(mailer.sent_to().is_empty());
  }
}
