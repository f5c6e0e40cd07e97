//! Content fetching for source polling.
//!
//! Only polling goes through here; delivery never retries. Failed requests
//! are retried with bounded exponential backoff before the source is given up
//! on for the cycle.

use std::{future::Future, time::Duration};

use reqwest::Client;
use thiserror::Error;

use crate::settings::FetchSettings;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request to {url} failed: {reason}")]
  Request { url: String, reason: String },

  #[error("{url} answered HTTP {status}")]
  Status { url: String, status: u16 },
}

/// Produces the text body behind a URL.
pub trait Fetcher: Send + Sync {
  fn fetch_text<'a>(
    &'a self,
    url: &'a str,
  ) -> impl Future<Output = Result<String, FetchError>> + Send + 'a;
}

// ─── Backoff ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
  pub max_attempts: u32,
  pub min_delay:    Duration,
  pub max_delay:    Duration,
}

impl Backoff {
  /// Delay before retry number `attempt` (1-based): `min * 2^(attempt-1)`,
  /// capped at `max`.
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.min_delay.saturating_mul(factor).min(self.max_delay)
  }
}

impl From<&FetchSettings> for Backoff {
  fn from(s: &FetchSettings) -> Self {
    Self {
      max_attempts: s.max_attempts.max(1),
      min_delay:    Duration::from_secs(s.backoff_min_secs),
      max_delay:    Duration::from_secs(s.backoff_max_secs.max(s.backoff_min_secs)),
    }
  }
}

// ─── HTTP fetcher ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client:  Client,
  backoff: Backoff,
}

impl HttpFetcher {
  pub fn new(settings: &FetchSettings) -> reqwest::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .user_agent(concat!("gazette/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, backoff: Backoff::from(settings) })
  }

  async fn attempt(&self, url: &str) -> Result<String, FetchError> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| FetchError::Request { url: url.to_owned(), reason: e.to_string() })?;
    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status { url: url.to_owned(), status: status.as_u16() });
    }
    response
      .text()
      .await
      .map_err(|e| FetchError::Request { url: url.to_owned(), reason: e.to_string() })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
    let mut attempt = 1;
    loop {
      match self.attempt(url).await {
        Ok(body) => return Ok(body),
        Err(e) if attempt >= self.backoff.max_attempts => return Err(e),
        Err(e) => {
          let delay = self.backoff.delay(attempt);
          tracing::debug!(url, attempt, ?delay, error = %e, "fetch failed, retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_doubles_up_to_the_cap() {
    let backoff = Backoff::from(&FetchSettings::default());
    assert_eq!(backoff.max_attempts, 3);
    let delays: Vec<u64> = (1..=5).map(|n| backoff.delay(n).as_secs()).collect();
    assert_eq!(delays, [2, 4, 8, 10, 10]);
  }

  #[test]
  fn zero_attempts_still_tries_once() {
    let settings = FetchSettings { max_attempts: 0, ..FetchSettings::default() };
    assert_eq!(Backoff::from(&settings).max_attempts, 1);
  }
}
