//! The normalizer: raw source records in, canonical [`ContentUnit`]s out.
//!
//! Text is reduced from markup, whitespace-collapsed (unless the source opts
//! out), and fingerprinted. A record that cannot be normalised is reported as
//! a [`SkippedRecord`]; it never aborts the rest of the batch.

use std::{collections::HashSet, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::content::{ContentUnit, FeedEntry, PageCapture, RawRecord};

/// Characters of body text that participate in a URL-less fingerprint.
pub const BODY_PREFIX_CHARS: usize = 500;

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<!--.*?-->")
    .expect("static regex")
});

static TAG_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));

static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
    .expect("static regex")
});

// ─── Options and results ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
  /// Collapse whitespace runs in title and body to single spaces.
  pub collapse_whitespace: bool,
  /// Keep the record's own publish date; otherwise units are undated.
  pub use_published_date:  bool,
}

impl Default for NormalizeOptions {
  fn default() -> Self {
    Self { collapse_whitespace: true, use_published_date: true }
  }
}

/// Why a record could not become a content unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformed {
  #[error("record has no title, body, or url")]
  Empty,
  #[error("invalid url {0:?}")]
  InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
  /// Position of the record in the input batch.
  pub index:  usize,
  pub reason: Malformed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeBatch {
  pub units:   Vec<ContentUnit>,
  pub skipped: Vec<SkippedRecord>,
}

// ─── Text helpers ────────────────────────────────────────────────────────────

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reduce markup to its visible text. Tags become spaces, so adjacent block
/// elements do not run together; whitespace is left as found.
pub fn html_to_text(html: &str) -> String {
  let without_code = SCRIPT_STYLE_RE.replace_all(html, " ");
  let without_tags = TAG_RE.replace_all(&without_code, " ");
  html_escape::decode_html_entities(&without_tags).into_owned()
}

/// Anchor targets in `html`, de-duplicated in first-seen order.
pub fn extract_links(html: &str) -> Vec<String> {
  let hrefs = HREF_RE.captures_iter(html).filter_map(|caps| {
    let raw = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    let href = html_escape::decode_html_entities(raw.as_str()).trim().to_owned();
    (!href.is_empty()).then_some(href)
  });
  dedupe_preserving_order(hrefs)
}

pub fn dedupe_preserving_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
  let mut seen = HashSet::new();
  items
    .into_iter()
    .filter(|item| seen.insert(item.clone()))
    .collect()
}

/// Parse a feed date in either RFC 2822 (RSS) or RFC 3339 (Atom) form.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  DateTime::parse_from_rfc2822(raw)
    .or_else(|_| DateTime::parse_from_rfc3339(raw))
    .map(|dt| dt.with_timezone(&Utc))
    .ok()
}

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// The string a unit's identity is derived from: its URL when it has one,
/// otherwise its title joined with a bounded prefix of its body.
pub fn identity(url: Option<&str>, title: &str, body: &str) -> String {
  match url {
    Some(url) => url.to_owned(),
    None => {
      let prefix: String = body.chars().take(BODY_PREFIX_CHARS).collect();
      format!("{title}:{prefix}")
    }
  }
}

/// SHA-256 hex digest of [`identity`].
pub fn fingerprint(url: Option<&str>, title: &str, body: &str) -> String {
  sha256_hex(&identity(url, title, body))
}

pub fn sha256_hex(text: &str) -> String {
  hex::encode(Sha256::digest(text.as_bytes()))
}

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Normalise one record.
pub fn normalize(
  source_id:   &str,
  record:      RawRecord,
  ingested_at: DateTime<Utc>,
  options:     NormalizeOptions,
) -> Result<ContentUnit, Malformed> {
  let draft = match record {
    RawRecord::Feed(entry) => feed_draft(entry, options)?,
    RawRecord::Page(page) => page_draft(page)?,
  };

  let (title, body_text) = if options.collapse_whitespace {
    (collapse_whitespace(&draft.title), collapse_whitespace(&draft.body))
  } else {
    (draft.title, draft.body)
  };

  if title.trim().is_empty() && body_text.trim().is_empty() && draft.url.is_none() {
    return Err(Malformed::Empty);
  }

  let fingerprint = fingerprint(draft.url.as_deref(), &title, &body_text);

  Ok(ContentUnit {
    source_id: source_id.to_owned(),
    title,
    body_text,
    url: draft.url,
    published_at: draft.published_at,
    ingested_at,
    links: draft.links,
    fingerprint,
  })
}

/// Normalise a whole batch, collecting failures instead of stopping at them.
pub fn normalize_batch(
  source_id:   &str,
  records:     Vec<RawRecord>,
  ingested_at: DateTime<Utc>,
  options:     NormalizeOptions,
) -> NormalizeBatch {
  let mut batch = NormalizeBatch::default();
  for (index, record) in records.into_iter().enumerate() {
    match normalize(source_id, record, ingested_at, options) {
      Ok(unit) => batch.units.push(unit),
      Err(reason) => {
        tracing::warn!(source_id, index, %reason, "skipping malformed record");
        batch.skipped.push(SkippedRecord { index, reason });
      }
    }
  }
  batch
}

struct Draft {
  title:        String,
  body:         String,
  url:          Option<String>,
  published_at: Option<DateTime<Utc>>,
  links:        Vec<String>,
}

fn feed_draft(entry: FeedEntry, options: NormalizeOptions) -> Result<Draft, Malformed> {
  let url = entry.link.as_deref().map(validate_url).transpose()?.flatten();

  let markup = entry
    .content_html
    .filter(|c| !c.trim().is_empty())
    .or(entry.summary_html)
    .unwrap_or_default();

  let published_at = if options.use_published_date {
    entry.published.as_deref().and_then(parse_published)
  } else {
    None
  };

  Ok(Draft {
    title: entry.title.as_deref().map(html_to_text).unwrap_or_default(),
    body: html_to_text(&markup),
    url,
    published_at,
    links: extract_links(&markup),
  })
}

fn page_draft(page: PageCapture) -> Result<Draft, Malformed> {
  let url = validate_url(&page.url)?;
  Ok(Draft {
    title: page.title,
    body: page.text,
    url,
    published_at: None,
    links: dedupe_preserving_order(page.links),
  })
}

/// Blank links mean "no url"; anything else must be an absolute http(s) URL.
fn validate_url(raw: &str) -> Result<Option<String>, Malformed> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Ok(None);
  }
  match url::Url::parse(trimmed) {
    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
      Ok(Some(trimmed.to_owned()))
    }
    _ => Err(Malformed::InvalidUrl(trimmed.to_owned())),
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() }

  fn entry(title: &str, link: Option<&str>, html: &str) -> RawRecord {
    RawRecord::Feed(FeedEntry {
      title:        Some(title.into()),
      link:         link.map(Into::into),
      content_html: None,
      summary_html: Some(html.into()),
      published:    Some("Wed, 01 May 2024 09:30:00 GMT".into()),
    })
  }

  #[test]
  fn feed_entry_becomes_clean_unit() {
    let unit = normalize(
      "feed",
      entry(
        "  Big   &amp; Small ",
        Some("https://example.com/a"),
        "<p>Hello\n\n <b>world</b></p><script>track()</script>",
      ),
      at(),
      NormalizeOptions::default(),
    )
    .unwrap();

    assert_eq!(unit.title, "Big & Small");
    assert_eq!(unit.body_text, "Hello world");
    assert_eq!(unit.url.as_deref(), Some("https://example.com/a"));
    assert_eq!(
      unit.published_at,
      Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap())
    );
    assert_eq!(unit.fingerprint, sha256_hex("https://example.com/a"));
  }

  #[test]
  fn opting_out_keeps_whitespace() {
    let options = NormalizeOptions { collapse_whitespace: false, use_published_date: false };
    let unit = normalize("feed", entry("A  B", None, "x\n\ny"), at(), options).unwrap();
    assert_eq!(unit.title, "A  B");
    assert_eq!(unit.body_text, "x\n\ny");
    assert!(unit.published_at.is_none());
  }

  #[test]
  fn fingerprint_without_url_uses_title_and_bounded_prefix() {
    let body_a = format!("{}{}", "a".repeat(BODY_PREFIX_CHARS), "tail one");
    let body_b = format!("{}{}", "a".repeat(BODY_PREFIX_CHARS), "tail two");
    assert_eq!(fingerprint(None, "t", &body_a), fingerprint(None, "t", &body_b));
    assert_ne!(fingerprint(None, "t", "first"), fingerprint(None, "t", "second"));
    assert_ne!(fingerprint(None, "t1", "same"), fingerprint(None, "t2", "same"));
  }

  #[test]
  fn links_deduplicate_in_first_seen_order() {
    let html = r#"<a href="https://b.example">b</a>
      <a class="x" href='https://a.example'>a</a>
      <a href="https://b.example">again</a>
      <a href="https://c.example/?x=1&amp;y=2">c</a>
      <a name="anchor">no href</a>"#;
    assert_eq!(
      extract_links(html),
      vec!["https://b.example", "https://a.example", "https://c.example/?x=1&y=2"]
    );
  }

  #[test]
  fn malformed_records_are_skipped_not_fatal() {
    let records = vec![
      entry("ok", Some("https://example.com/1"), "body"),
      RawRecord::Feed(FeedEntry::default()),
      entry("bad link", Some("not a url"), "body"),
      entry("also ok", None, "body"),
    ];
    let batch = normalize_batch("feed", records, at(), NormalizeOptions::default());

    assert_eq!(batch.units.len(), 2);
    assert_eq!(batch.skipped.len(), 2);
    assert_eq!(batch.skipped[0], SkippedRecord { index: 1, reason: Malformed::Empty });
    assert!(matches!(batch.skipped[1].reason, Malformed::InvalidUrl(_)));
  }

  #[test]
  fn page_capture_keeps_url_identity() {
    let page = RawRecord::Page(PageCapture {
      url:   "https://example.com/changelog".into(),
      title: "Changelog".into(),
      text:  "v2   released".into(),
      links: vec!["https://x.example".into(), "https://x.example".into()],
    });
    let unit = normalize("site", page, at(), NormalizeOptions::default()).unwrap();
    assert_eq!(unit.body_text, "v2 released");
    assert_eq!(unit.links, vec!["https://x.example"]);
    assert_eq!(unit.fingerprint, sha256_hex("https://example.com/changelog"));
  }

  #[test]
  fn atom_dates_parse() {
    assert_eq!(
      parse_published("2024-05-01T10:00:00+02:00"),
      Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
    );
    assert_eq!(parse_published("yesterday"), None);
  }
}
