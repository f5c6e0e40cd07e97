//! Per-recipient render context and the [`Renderer`] seam.
//!
//! The context is assembled here so that tracked links, the open pixel, and
//! the unsubscribe URL are always built the same way; turning it into markup
//! is the renderer's job.

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
  Result,
  catalog::{DigestDef, TemplateDef},
  links::{TrackingLinks, run_links},
  model::{DigestRun, Recipient, RunItem},
};

/// One entry as shown to a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderItem {
  pub rank:         u32,
  pub title:        String,
  pub summary:      String,
  pub source_id:    String,
  pub published_at: Option<DateTime<Utc>>,
  /// Tracked when click tracking is on.
  pub url:          Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
  pub digest_name:     String,
  pub run_id:          i64,
  pub period_start:    NaiveDate,
  pub period_end:      NaiveDate,
  pub recipient_email: String,
  pub recipient_name:  Option<String>,
  pub subject:         String,
  pub items:           Vec<RenderItem>,
  /// Every distinct link of the run, tracked when click tracking is on;
  /// empty when the template disables links.
  pub links:           Vec<String>,
  pub open_pixel_url:  Option<String>,
  pub unsubscribe_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
  pub subject: String,
  pub html:    String,
  pub text:    String,
}

#[derive(Debug, thiserror::Error)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);

pub trait Renderer: Send + Sync {
  fn render(&self, ctx: &RenderContext) -> Result<RenderedMessage, RenderError>;
}

/// Fill `{digest_name}`, `{date_start}` and `{date_end}` in a subject format.
pub fn subject_line(
  format: &str,
  digest_name: &str,
  start: NaiveDate,
  end: NaiveDate,
) -> String {
  format
    .replace("{digest_name}", digest_name)
    .replace("{date_start}", &start.format("%Y-%m-%d").to_string())
    .replace("{date_end}", &end.format("%Y-%m-%d").to_string())
}

/// Assemble the context for one recipient of a built run.
pub fn compose(
  digest:    &DigestDef,
  template:  &TemplateDef,
  run:       &DigestRun,
  items:     &[RunItem],
  recipient: &Recipient,
  links:     &TrackingLinks,
  now:       DateTime<Utc>,
) -> Result<RenderContext> {
  let email = recipient.email.as_str();
  let click_tracking = digest.tracking.click_tracking;

  let track = |target: &str| -> Result<String> {
    if click_tracking {
      links.click_url(email, run.id, target, now)
    } else {
      Ok(target.to_owned())
    }
  };

  let render_items = items
    .iter()
    .map(|item| {
      Ok(RenderItem {
        rank:         item.rank,
        title:        item.title.clone(),
        summary:      item.summary.clone(),
        source_id:    item.source_id.clone(),
        published_at: item.published_at,
        url:          item.url.as_deref().map(track).transpose()?,
      })
    })
    .collect::<Result<Vec<_>>>()?;

  let all_links = if template.summary_rules.include_links {
    run_links(items)
      .iter()
      .map(|l| track(l))
      .collect::<Result<Vec<_>>>()?
  } else {
    Vec::new()
  };

  let open_pixel_url = if digest.tracking.open_tracking {
    Some(links.open_pixel_url(email, run.id, now)?)
  } else {
    None
  };

  let period_start = run.period_start.date_naive();
  let period_end = run.period_end.date_naive();

  Ok(RenderContext {
    digest_name: digest.name.clone(),
    run_id: run.id,
    period_start,
    period_end,
    recipient_email: recipient.email.clone(),
    recipient_name: recipient.name.clone(),
    subject: subject_line(&template.subject_format, &digest.name, period_start, period_end),
    items: render_items,
    links: all_links,
    open_pixel_url,
    unsubscribe_url: links.unsubscribe_url(email, run.id, now)?,
  })
}
