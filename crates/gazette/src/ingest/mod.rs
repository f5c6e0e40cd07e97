//! The polling pipeline: fetch each source, normalise its records, dedupe
//! the cycle's units, and persist them together with the cycle's page
//! snapshots.
//!
//! A source that cannot be fetched or parsed is reported in its
//! [`SourceOutcome`] and skipped for the cycle; the rest carry on.

pub mod feed;
pub mod page;

use gazette_core::{
  catalog::{SourceDef, SourceKind},
  clock::Clock,
  content::{PageCapture, RawRecord},
  dedup::dedupe_units,
  model::Snapshot,
  normalize::{NormalizeOptions, normalize_batch, sha256_hex},
  store::DigestStore,
};

use crate::{
  Error, Result,
  fetch::Fetcher,
  ingest::page::{PageSelectors, detect, reduce_page},
};

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
  Polled {
    records: usize,
    /// Records the normalizer rejected.
    skipped: usize,
    units:   usize,
  },
  Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
  pub source_id: String,
  pub status:    SourceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
  pub per_source: Vec<SourceOutcome>,
  pub inserted:   usize,
  /// Units dropped in-cycle or already stored.
  pub duplicates: usize,
}

impl PollReport {
  pub fn skipped(&self) -> usize {
    self
      .per_source
      .iter()
      .map(|o| match o.status {
        SourceStatus::Polled { skipped, .. } => skipped,
        SourceStatus::Failed(_) => 0,
      })
      .sum()
  }

  pub fn failed(&self) -> usize {
    self
      .per_source
      .iter()
      .filter(|o| matches!(o.status, SourceStatus::Failed(_)))
      .count()
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Poll every enabled source (or just `only`) once.
///
/// Sources are synced from the catalog first so `last_polled_at` is tracked
/// for each of them.
pub async fn poll_sources<S, F>(
  store:   &S,
  fetcher: &F,
  clock:   &dyn Clock,
  sources: &[SourceDef],
  only:    Option<&str>,
) -> Result<PollReport>
where
  S: DigestStore,
  F: Fetcher,
{
  store.sync_sources(sources.to_vec()).await.map_err(Error::store)?;

  let selected: Vec<&SourceDef> = match only {
    Some(id) => {
      let source = sources
        .iter()
        .find(|s| s.source_id == id)
        .ok_or_else(|| Error::SourceNotFound(id.to_owned()))?;
      vec![source]
    }
    None => sources.iter().filter(|s| s.enabled).collect(),
  };

  let mut report = PollReport::default();
  let mut units = Vec::new();
  let mut snapshots = Vec::new();
  let mut polled = Vec::new();

  for source in selected {
    let source_id = source.source_id.clone();
    let status = match collect(store, fetcher, clock, source).await {
      Ok(Collected { records, snapshot }) => {
        let count = records.len();
        let options = NormalizeOptions {
          collapse_whitespace: source.params.strip_whitespace,
          use_published_date:  source.params.use_entry_published_date,
        };
        let batch = normalize_batch(&source_id, records, clock.now(), options);
        let status = SourceStatus::Polled {
          records: count,
          skipped: batch.skipped.len(),
          units:   batch.units.len(),
        };
        units.extend(batch.units);
        snapshots.extend(snapshot);
        polled.push(source_id.clone());
        status
      }
      Err(e) => {
        tracing::warn!(source_id = %source_id, error = %e, "source poll failed");
        SourceStatus::Failed(e.to_string())
      }
    };
    report.per_source.push(SourceOutcome { source_id, status });
  }

  let collected = units.len();
  let unique = dedupe_units(units);
  let in_cycle_duplicates = collected - unique.len();

  let outcome = store.commit_poll(unique, snapshots).await.map_err(Error::store)?;
  report.inserted = outcome.inserted;
  report.duplicates = outcome.duplicates + in_cycle_duplicates;

  let polled_at = clock.now();
  for source_id in polled {
    store.mark_polled(source_id, polled_at).await.map_err(Error::store)?;
  }

  tracing::info!(
    inserted = report.inserted,
    duplicates = report.duplicates,
    failed = report.failed(),
    "poll complete"
  );
  Ok(report)
}

/// What one source yielded: raw records, and for pages the snapshot to
/// store alongside them.
struct Collected {
  records:  Vec<RawRecord>,
  snapshot: Option<Snapshot>,
}

/// Fetch one source and turn it into raw records.
async fn collect<S, F>(
  store:   &S,
  fetcher: &F,
  clock:   &dyn Clock,
  source:  &SourceDef,
) -> Result<Collected, String>
where
  S: DigestStore,
  F: Fetcher,
{
  match source.kind {
    SourceKind::Rss => {
      let url = source.params.feed_url.as_deref().ok_or("rss source has no feed_url")?;
      let body = fetcher.fetch_text(url).await.map_err(|e| e.to_string())?;
      let entries = feed::parse_feed(&body).map_err(|e| e.to_string())?;
      let records = entries.into_iter().map(RawRecord::Feed).collect();
      Ok(Collected { records, snapshot: None })
    }
    SourceKind::WebsiteChange => {
      let url = source.params.url.as_deref().ok_or("website_change source has no url")?;
      let selectors = PageSelectors::from_params(&source.params).map_err(|e| e.to_string())?;
      let body = fetcher.fetch_text(url).await.map_err(|e| e.to_string())?;
      let page = reduce_page(&body, &selectors, source.params.strip_whitespace);
      let hash = sha256_hex(&page.text);

      let previous = store
        .latest_snapshot(source.source_id.clone())
        .await
        .map_err(|e| e.to_string())?;
      let change = detect(
        previous.as_ref(),
        &hash,
        &page.text,
        source.params.change_threshold_ratio,
      );
      tracing::debug!(source_id = %source.source_id, ?change, "page compared");

      let snapshot = Snapshot {
        source_id:    source.source_id.clone(),
        url:          url.to_owned(),
        content_hash: hash,
        content_text: page.text.clone(),
        created_at:   clock.now(),
      };

      let records = if change.emits_item() {
        vec![RawRecord::Page(PageCapture {
          url:   url.to_owned(),
          title: page.title,
          text:  page.text,
          links: page.links,
        })]
      } else {
        Vec::new()
      };
      Ok(Collected { records, snapshot: Some(snapshot) })
    }
  }
}
