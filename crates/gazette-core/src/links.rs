//! Tracked URLs embedded in outgoing messages, and the open-redirect guard
//! applied when a click comes back.

use chrono::{DateTime, Utc};
use url::form_urlencoded::byte_serialize;

use crate::{
  Result,
  dedup::first_by_key,
  model::RunItem,
  token::{TokenCodec, TokenPurpose},
};

/// Builds the tracking URLs for one deployment.
#[derive(Debug, Clone)]
pub struct TrackingLinks {
  base_url: String,
  codec:    TokenCodec,
}

impl TrackingLinks {
  pub fn new(base_url: impl Into<String>, codec: TokenCodec) -> Self {
    let base_url = base_url.into().trim_end_matches('/').to_owned();
    Self { base_url, codec }
  }

  pub fn codec(&self) -> &TokenCodec { &self.codec }

  /// `{base}/t/open/{token}.png`
  pub fn open_pixel_url(
    &self,
    email: &str,
    run_id: i64,
    now: DateTime<Utc>,
  ) -> Result<String> {
    let token = self.codec.issue(email, run_id, TokenPurpose::Open, now)?;
    Ok(format!("{}/t/open/{token}.png", self.base_url))
  }

  /// `{base}/t/click/{token}?u={target}`
  pub fn click_url(
    &self,
    email: &str,
    run_id: i64,
    target: &str,
    now: DateTime<Utc>,
  ) -> Result<String> {
    let token = self.codec.issue(email, run_id, TokenPurpose::Click(target), now)?;
    let encoded: String = byte_serialize(target.as_bytes()).collect();
    Ok(format!("{}/t/click/{token}?u={encoded}", self.base_url))
  }

  /// `{base}/unsubscribe/{token}`
  pub fn unsubscribe_url(
    &self,
    email: &str,
    run_id: i64,
    now: DateTime<Utc>,
  ) -> Result<String> {
    let token = self.codec.issue(email, run_id, TokenPurpose::Unsubscribe, now)?;
    Ok(format!("{}/unsubscribe/{token}", self.base_url))
  }
}

/// Every link present in a run's items: each item's own URL followed by the
/// links found in its body. First occurrence wins.
pub fn run_links(items: &[RunItem]) -> Vec<String> {
  let all = items
    .iter()
    .flat_map(|item| item.url.iter().chain(item.links.iter()))
    .cloned();
  first_by_key(all, Clone::clone)
}

/// Whether `target` may be redirected to for a click on this run. A valid
/// signature alone is not enough: the URL must appear in the run's items.
pub fn is_allowed_link(items: &[RunItem], target: &str) -> bool {
  items.iter().any(|item| {
    item.url.as_deref() == Some(target) || item.links.iter().any(|l| l == target)
  })
}
