//! Content units (the canonical, source-agnostic form of one ingested record)
//! and the raw records fetchers hand to the normalizer.
//!
//! A content unit is immutable once created. Its identity within a source is
//! its fingerprint; `(source_id, fingerprint)` is unique in storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Raw records ─────────────────────────────────────────────────────────────

/// One entry of an RSS or Atom feed, as parsed but not yet cleaned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
  pub title:        Option<String>,
  pub link:         Option<String>,
  /// Full content markup (`content:encoded`, Atom `content`).
  pub content_html: Option<String>,
  /// Short description markup (`description`, Atom `summary`).
  pub summary_html: Option<String>,
  /// Publish date exactly as the feed spelled it.
  pub published:    Option<String>,
}

/// A web page whose text changed enough to be worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCapture {
  pub url:   String,
  pub title: String,
  /// Text already reduced from markup.
  pub text:  String,
  pub links: Vec<String>,
}

/// A source-specific record awaiting normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum RawRecord {
  Feed(FeedEntry),
  Page(PageCapture),
}

// ─── Canonical units ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
  pub source_id:    String,
  pub title:        String,
  pub body_text:    String,
  pub url:          Option<String>,
  pub published_at: Option<DateTime<Utc>>,
  pub ingested_at:  DateTime<Utc>,
  /// Outbound links found in the record, de-duplicated in first-seen order.
  pub links:        Vec<String>,
  /// SHA-256 hex digest of the unit's identity string.
  pub fingerprint:  String,
}

/// A content unit as persisted, carrying its storage id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUnit {
  pub id:   i64,
  pub unit: ContentUnit,
}
