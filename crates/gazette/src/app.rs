//! The assembled application: store, collaborators, catalog, and the
//! operations the commands and the scheduler run.

use std::sync::Arc;

use chrono_tz::Tz;
use gazette_core::{
  catalog::Catalog,
  clock::{Clock, SystemClock},
  delivery::Mailer,
  links::TrackingLinks,
  model::{DigestRun, PruneStats, ReportCounts},
  render::Renderer,
  schedule::{Schedule, evaluate},
  store::DigestStore,
  summarize::Summarizer,
  token::TokenCodec,
};
use gazette_store_sqlite::SqliteStore;

use crate::{
  Error, Result,
  build::{self, Preview},
  dispatch::{DispatchReport, Dispatcher},
  fetch::{Fetcher, HttpFetcher},
  ingest::{self, PollReport},
  mail::ConfiguredMailer,
  maintenance,
  render::HtmlRenderer,
  settings::Settings,
  summarizers::ConfiguredSummarizer,
};

pub struct App<S, F, Z, M, R> {
  pub store:          S,
  pub fetcher:        F,
  pub summarizer:     Z,
  pub mailer:         M,
  pub renderer:       R,
  pub catalog:        Catalog,
  /// Absent when no tracking secret is configured.
  pub links:          Option<TrackingLinks>,
  pub clock:          Arc<dyn Clock>,
  pub timezone:       Tz,
  pub retention_days: u32,
}

/// The production wiring.
pub type DefaultApp =
  App<SqliteStore, HttpFetcher, ConfiguredSummarizer, ConfiguredMailer, HtmlRenderer>;

impl DefaultApp {
  pub async fn from_settings(settings: &Settings, catalog: Catalog) -> Result<Self> {
    let store = SqliteStore::open(&settings.store_path())
      .await
      .map_err(Error::store)?;
    let links = tracking_codec(settings)?
      .map(|codec| TrackingLinks::new(settings.app_base_url.clone(), codec));

    Ok(Self {
      store,
      fetcher: HttpFetcher::new(&settings.fetch)?,
      summarizer: ConfiguredSummarizer::from_settings(&settings.summary)?,
      mailer: ConfiguredMailer::from_settings(&settings.mail)?,
      renderer: HtmlRenderer,
      catalog,
      links,
      clock: Arc::new(SystemClock),
      timezone: settings.timezone,
      retention_days: settings.retention_days,
    })
  }
}

/// The token codec for `tracking.secret`, or `None` when it is unset.
pub fn tracking_codec(settings: &Settings) -> Result<Option<TokenCodec>> {
  if settings.tracking.secret.is_empty() {
    return Ok(None);
  }
  Ok(Some(TokenCodec::new(&settings.tracking.secret)?))
}

impl<S, F, Z, M, R> App<S, F, Z, M, R>
where
  S: DigestStore,
  F: Fetcher,
  Z: Summarizer,
  M: Mailer,
  R: Renderer,
{
  fn links(&self) -> Result<&TrackingLinks> { self.links.as_ref().ok_or(Error::MissingSecret) }

  pub async fn poll(&self, only: Option<&str>) -> Result<PollReport> {
    ingest::poll_sources(
      &self.store,
      &self.fetcher,
      self.clock.as_ref(),
      &self.catalog.sources,
      only,
    )
    .await
  }

  pub async fn build(&self, digest_id: &str) -> Result<DigestRun> {
    build::build_run(&self.store, &self.summarizer, &self.catalog, digest_id, self.clock.now())
      .await
  }

  /// Build a run, then render it for the first eligible member.
  pub async fn dry_run(&self, digest_id: &str) -> Result<(DigestRun, Option<Preview>)> {
    let links = self.links()?;
    let run = self.build(digest_id).await?;
    let preview = build::preview(
      &self.store,
      &self.renderer,
      links,
      &self.catalog,
      &run,
      self.clock.now(),
    )
    .await?;
    Ok((run, preview))
  }

  pub async fn send(&self, run_id: i64) -> Result<DispatchReport> {
    Dispatcher::new(
      &self.store,
      &self.mailer,
      &self.renderer,
      self.links()?,
      self.clock.as_ref(),
    )
    .dispatch(&self.catalog, run_id)
    .await
  }

  /// Evaluate every digest's schedule once; build and send each one that is
  /// due. Returns the ids of the runs created. A digest that fails is logged
  /// and does not stop the others.
  pub async fn run_due(&self) -> Vec<i64> {
    let mut fired = Vec::new();
    for digest in &self.catalog.digests {
      let digest_id = digest.digest_id.as_str();
      match self.run_if_due(digest_id).await {
        Ok(Some(run_id)) => fired.push(run_id),
        Ok(None) => {}
        Err(e) => tracing::warn!(digest_id, error = %e, "scheduled run failed"),
      }
    }
    fired
  }

  async fn run_if_due(&self, digest_id: &str) -> Result<Option<i64>> {
    let digest = self.catalog.digest(digest_id)?;
    let schedule = Schedule::for_digest(digest, self.timezone)?;
    let last_run = self
      .store
      .latest_run(digest_id.to_owned())
      .await
      .map_err(Error::store)?
      .map(|r| r.created_at);

    let decision = evaluate(self.clock.now(), &schedule, last_run);
    if !decision.is_due() {
      tracing::trace!(digest_id, ?decision, "not due");
      return Ok(None);
    }

    tracing::info!(digest_id, "digest due");
    // Fail on a missing secret before a run is created for nobody.
    self.links()?;
    let run = self.build(digest_id).await?;
    self.send(run.id).await?;
    Ok(Some(run.id))
  }

  pub async fn prune(&self) -> Result<PruneStats> {
    maintenance::prune(&self.store, self.clock.now(), self.retention_days).await
  }

  pub async fn report(&self, digest_id: &str, days: u32) -> Result<ReportCounts> {
    self.catalog.digest(digest_id)?;
    maintenance::report(&self.store, digest_id, self.clock.now(), days).await
  }
}
