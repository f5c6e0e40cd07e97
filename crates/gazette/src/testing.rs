//! Shared test fixtures: a small catalog and stub collaborators.

use std::{collections::HashSet, sync::Mutex};

use config::FileFormat;
use gazette_core::{
  catalog::Catalog,
  delivery::{MailError, Mailer, OutgoingMessage},
  summarize::{SummaryError, SummaryRequest, Summarizer},
};

use crate::settings::parse_catalog;

/// One feed, a two-member group whose first member is disabled, and a daily
/// digest at 08:00 UTC.
pub fn catalog() -> Catalog {
  parse_catalog(
    r#"
      [[sources]]
      source_id = "feed"
      kind = "rss"
      params = { feed_url = "https://feed.test/rss" }

      [[groups]]
      group_id = "team"
      name = "Team"
      members = [
        { email = "a@x.test", name = "A", enabled = false },
        { email = "b@x.test", name = "B" },
      ]

      [[templates]]
      template_id = "default"
      subject_format = "{digest_name}: {date_start} to {date_end}"

      [[digests]]
      digest_id = "daily"
      name = "Daily"
      group_id = "team"
      template_id = "default"
      sources = ["feed"]
      frequency = "daily"
      send_policy = { send_time_local = "08:00" }
    "#,
    FileFormat::Toml,
  )
  .expect("test catalog")
}

/// Summarises as `summary: <first sentence>`.
pub struct ShortSummarizer;

impl Summarizer for ShortSummarizer {
  async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummaryError> {
    let first = request.content.split('.').next().unwrap_or_default();
    Ok(format!("summary: {}", first.trim()))
  }
}

/// Records every send; fails for the listed addresses.
#[derive(Default)]
pub struct RecordingMailer {
  sent:     Mutex<Vec<String>>,
  fail_for: HashSet<String>,
}

impl RecordingMailer {
  pub fn failing_for(emails: &[&str]) -> Self {
    Self {
      sent:     Mutex::default(),
      fail_for: emails.iter().map(|e| e.to_string()).collect(),
    }
  }

  pub fn sent_to(&self) -> Vec<String> { self.sent.lock().unwrap().clone() }
}

impl Mailer for RecordingMailer {
  async fn send(&self, message: &OutgoingMessage) -> Result<String, MailError> {
    if self.fail_for.contains(&message.to) {
      return Err(MailError::new("mailbox unavailable"));
    }
    let mut sent = self.sent.lock().unwrap();
    sent.push(message.to.clone());
    Ok(format!("msg-{}", sent.len()))
  }
}
