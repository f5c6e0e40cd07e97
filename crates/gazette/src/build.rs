//! The build pipeline: select, summarise, and persist one run of a digest.

use chrono::{DateTime, Utc};
use gazette_core::{
  catalog::Catalog,
  delivery::eligible,
  links::TrackingLinks,
  model::{DigestRun, NewRun},
  render::{RenderedMessage, Renderer, compose},
  select::{select, window},
  store::{DigestStore, NewRunItem},
  summarize::{Summarizer, SummaryRequest},
};

use crate::{Error, Result, summarizers::summarize_or_truncate};

/// Build a run of `digest_id` at `now`.
///
/// Configuration problems (unknown digest, template, group, or an unknown
/// or disabled source) and a window reaching past the calendar fail before
/// anything is written. The run is created,
/// its items summarised, and the items stored together with the move to
/// `built`.
pub async fn build_run<S, Z>(
  store:      &S,
  summarizer: &Z,
  catalog:    &Catalog,
  digest_id:  &str,
  now:        DateTime<Utc>,
) -> Result<DigestRun>
where
  S: DigestStore,
  Z: Summarizer,
{
  let digest = catalog.digest(digest_id)?;
  let template = catalog.template(&digest.template_id)?;
  catalog.group(&digest.group_id)?;
  let sources = catalog.digest_sources(digest)?;
  let policy = &digest.selection_policy;
  let (period_start, period_end) = window(now, policy.window_days)?;

  store.sync_groups(catalog.groups.clone()).await.map_err(Error::store)?;

  let source_ids = sources.iter().map(|s| s.source_id.clone()).collect();
  let candidates = store
    .units_in_window(source_ids, period_start, period_end)
    .await
    .map_err(Error::store)?;
  let candidate_count = candidates.len();

  let mut selected = select(candidates, &catalog.source_kinds(), policy);
  if let Some(max) = template.summary_rules.max_items {
    selected.truncate(max);
  }

  let run = store
    .create_run(NewRun {
      digest_id: digest_id.to_owned(),
      period_start,
      period_end,
      created_at: now,
    })
    .await
    .map_err(Error::store)?;

  let mut items = Vec::with_capacity(selected.len());
  for (rank, item) in (1u32..).zip(selected) {
    let request = SummaryRequest::new(&template.summary_rules, item.unit.body_text.clone());
    let summary = summarize_or_truncate(summarizer, &request).await;
    items.push(NewRunItem { item, rank, summary });
  }
  let item_count = items.len();

  let run = store.complete_build(run.id, items).await.map_err(Error::store)?;
  tracing::info!(
    digest_id,
    run_id = run.id,
    candidates = candidate_count,
    items = item_count,
    "run built"
  );
  Ok(run)
}

/// A rendered message for one recipient, for dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
  pub recipient: String,
  pub message:   RenderedMessage,
}

/// Render `run` for the first eligible member of its group, if any.
pub async fn preview<S, R>(
  store:    &S,
  renderer: &R,
  links:    &TrackingLinks,
  catalog:  &Catalog,
  run:      &DigestRun,
  now:      DateTime<Utc>,
) -> Result<Option<Preview>>
where
  S: DigestStore,
  R: Renderer,
{
  let digest = catalog.digest(&run.digest_id)?;
  let template = catalog.template(&digest.template_id)?;

  let members = store
    .group_members(digest.group_id.clone())
    .await
    .map_err(Error::store)?;
  let Some(member) = eligible(&members).next() else {
    return Ok(None);
  };

  let items = store.run_items(run.id).await.map_err(Error::store)?;
  let ctx = compose(digest, template, run, &items, &member.recipient, links, now)?;
  Ok(Some(Preview {
    recipient: member.recipient.email.clone(),
    message:   renderer.render(&ctx)?,
  }))
}
