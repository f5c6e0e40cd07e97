//! Catalog types: the operator-maintained definitions of sources, groups,
//! templates, and digests.
//!
//! The catalog is read-only to the engine. Sources, groups, and memberships are
//! copied into the store by the sync step; digests and templates are consulted
//! straight from the catalog at build and send time.

use std::collections::HashMap;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Sources ─────────────────────────────────────────────────────────────────

/// The kind of upstream a source polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
  Rss,
  WebsiteChange,
}

impl SourceKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Rss => "rss",
      Self::WebsiteChange => "website_change",
    }
  }
}

/// Kind-specific polling parameters. Fields irrelevant to a kind are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceParams {
  /// `rss`: the feed URL.
  #[serde(default)]
  pub feed_url:                 Option<String>,
  /// `rss`: take the entry's own publish date (otherwise items are undated).
  #[serde(default = "default_true")]
  pub use_entry_published_date: bool,
  /// `website_change`: the page to watch.
  #[serde(default)]
  pub url:                      Option<String>,
  /// `website_change`: minimum change ratio (0..1) that produces an item.
  #[serde(default = "default_change_threshold")]
  pub change_threshold_ratio:   f64,
  /// `website_change`: CSS selector for the watched region. The first match
  /// is used; without one the whole body is watched.
  #[serde(default)]
  pub content_css:              Option<String>,
  /// `website_change`: CSS selector for the item title, falling back to the
  /// page's `<title>`.
  #[serde(default)]
  pub title_css:                Option<String>,
  /// `website_change`: CSS selectors for regions dropped before comparison.
  #[serde(default)]
  pub remove_css:               Vec<String>,
  /// Collapse whitespace in extracted text.
  #[serde(default = "default_true")]
  pub strip_whitespace:         bool,
}

impl Default for SourceParams {
  fn default() -> Self {
    Self {
      feed_url:                 None,
      use_entry_published_date: true,
      url:                      None,
      change_threshold_ratio:   default_change_threshold(),
      content_css:              None,
      title_css:                None,
      remove_css:               Vec::new(),
      strip_whitespace:         true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
  pub source_id:             String,
  pub kind:                  SourceKind,
  #[serde(default = "default_true")]
  pub enabled:               bool,
  #[serde(default = "default_poll_interval")]
  pub poll_interval_minutes: u64,
  #[serde(default)]
  pub params:                SourceParams,
}

// ─── Groups ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDef {
  pub email:   String,
  #[serde(default)]
  pub name:    Option<String>,
  /// `None` leaves the stored flags untouched on re-sync.
  #[serde(default)]
  pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDef {
  pub group_id: String,
  pub name:     String,
  #[serde(default)]
  pub members:  Vec<MemberDef>,
}

// ─── Templates ───────────────────────────────────────────────────────────────

/// Target summary length; maps to a sentence budget for the fallback
/// summarizer and a hint for model-backed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
  Short,
  #[default]
  Medium,
  Long,
}

impl SummaryLength {
  pub fn sentences(self) -> usize {
    match self {
      Self::Short => 2,
      Self::Medium => 4,
      Self::Long => 6,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Short => "short",
      Self::Medium => "medium",
      Self::Long => "long",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRules {
  #[serde(default = "default_style")]
  pub style:         String,
  #[serde(default)]
  pub length:        SummaryLength,
  #[serde(default = "default_tone")]
  pub tone:          String,
  #[serde(default = "default_language")]
  pub language:      String,
  /// Further cap applied after selection.
  #[serde(default)]
  pub max_items:     Option<usize>,
  #[serde(default = "default_true")]
  pub include_links: bool,
}

impl Default for SummaryRules {
  fn default() -> Self {
    Self {
      style:         default_style(),
      length:        SummaryLength::default(),
      tone:          default_tone(),
      language:      default_language(),
      max_items:     None,
      include_links: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDef {
  pub template_id:    String,
  /// Supports `{digest_name}`, `{date_start}`, and `{date_end}`.
  #[serde(default = "default_subject_format")]
  pub subject_format: String,
  #[serde(default)]
  pub summary_rules:  SummaryRules,
}

// ─── Digests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
  #[serde(default = "default_window_days")]
  pub window_days:           u32,
  #[serde(default = "default_max_items")]
  pub max_items_total:       usize,
  #[serde(default)]
  pub per_source_limit:      Option<usize>,
  #[serde(default)]
  pub dedupe_across_sources: bool,
  /// Score multiplier per source kind; kinds not listed weigh `1.0`.
  #[serde(default = "default_weights")]
  pub weights:               HashMap<SourceKind, f64>,
}

impl Default for SelectionPolicy {
  fn default() -> Self {
    Self {
      window_days:           default_window_days(),
      max_items_total:       default_max_items(),
      per_source_limit:      None,
      dedupe_across_sources: false,
      weights:               default_weights(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
  Daily,
  Weekly,
  Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendPolicy {
  /// Falls back to the process-wide default zone when unset.
  #[serde(default)]
  pub timezone:        Option<Tz>,
  #[serde(default = "default_send_time")]
  pub send_time_local: String,
  /// ISO weekday, 1 = Monday … 7 = Sunday. Weekly digests only.
  #[serde(default = "default_one_u8")]
  pub day_of_week:     u8,
  /// Monthly digests only.
  #[serde(default = "default_one_u32")]
  pub day_of_month:    u32,
}

impl Default for SendPolicy {
  fn default() -> Self {
    Self {
      timezone:        None,
      send_time_local: default_send_time(),
      day_of_week:     1,
      day_of_month:    1,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingPolicy {
  #[serde(default = "default_true")]
  pub open_tracking:  bool,
  #[serde(default = "default_true")]
  pub click_tracking: bool,
}

impl Default for TrackingPolicy {
  fn default() -> Self { Self { open_tracking: true, click_tracking: true } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestDef {
  pub digest_id:        String,
  pub name:             String,
  pub group_id:         String,
  pub template_id:      String,
  #[serde(default)]
  pub sources:          Vec<String>,
  #[serde(default)]
  pub selection_policy: SelectionPolicy,
  pub frequency:        Frequency,
  #[serde(default)]
  pub send_policy:      SendPolicy,
  #[serde(default)]
  pub tracking:         TrackingPolicy,
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
  #[serde(default)]
  pub sources:   Vec<SourceDef>,
  #[serde(default)]
  pub groups:    Vec<GroupDef>,
  #[serde(default)]
  pub templates: Vec<TemplateDef>,
  #[serde(default)]
  pub digests:   Vec<DigestDef>,
}

impl Catalog {
  pub fn digest(&self, digest_id: &str) -> Result<&DigestDef> {
    self
      .digests
      .iter()
      .find(|d| d.digest_id == digest_id)
      .ok_or_else(|| Error::DigestNotFound(digest_id.to_owned()))
  }

  pub fn template(&self, template_id: &str) -> Result<&TemplateDef> {
    self
      .templates
      .iter()
      .find(|t| t.template_id == template_id)
      .ok_or_else(|| Error::TemplateNotFound(template_id.to_owned()))
  }

  pub fn group(&self, group_id: &str) -> Result<&GroupDef> {
    self
      .groups
      .iter()
      .find(|g| g.group_id == group_id)
      .ok_or_else(|| Error::GroupNotFound(group_id.to_owned()))
  }

  pub fn source(&self, source_id: &str) -> Option<&SourceDef> {
    self.sources.iter().find(|s| s.source_id == source_id)
  }

  /// Resolve the sources a digest draws from, failing fast on any reference
  /// to an unknown or disabled source.
  pub fn digest_sources(&self, digest: &DigestDef) -> Result<Vec<&SourceDef>> {
    digest
      .sources
      .iter()
      .map(|id| {
        let source = self.source(id).ok_or_else(|| Error::UnknownSource {
          digest_id: digest.digest_id.clone(),
          source_id: id.clone(),
        })?;
        if !source.enabled {
          return Err(Error::DisabledSource {
            digest_id: digest.digest_id.clone(),
            source_id: id.clone(),
          });
        }
        Ok(source)
      })
      .collect()
  }

  /// Source kind per source id, for score weighting.
  pub fn source_kinds(&self) -> HashMap<String, SourceKind> {
    self
      .sources
      .iter()
      .map(|s| (s.source_id.clone(), s.kind))
      .collect()
  }
}

// ─── Defaults ────────────────────────────────────────────────────────────────

fn default_true() -> bool { true }
fn default_change_threshold() -> f64 { 0.1 }
fn default_poll_interval() -> u64 { 60 }
fn default_style() -> String { "bullets".to_owned() }
fn default_tone() -> String { "factual".to_owned() }
fn default_language() -> String { "en-GB".to_owned() }
fn default_subject_format() -> String {
  "{digest_name}: {date_start} to {date_end}".to_owned()
}
fn default_window_days() -> u32 { 2 }
fn default_max_items() -> usize { 20 }
fn default_send_time() -> String { "08:00".to_owned() }
fn default_one_u8() -> u8 { 1 }
fn default_one_u32() -> u32 { 1 }

/// Website changes edge out feed items; everything else weighs `1.0`.
pub fn default_weights() -> HashMap<SourceKind, f64> {
  HashMap::from([(SourceKind::Rss, 1.0), (SourceKind::WebsiteChange, 1.1)])
}

#[cfg(test)]
mod tests {
  use super::*;

  fn catalog() -> Catalog {
    Catalog {
      sources: vec![
        SourceDef {
          source_id:             "feed".into(),
          kind:                  SourceKind::Rss,
          enabled:               true,
          poll_interval_minutes: 60,
          params:                SourceParams::default(),
        },
        SourceDef {
          source_id:             "old".into(),
          kind:                  SourceKind::Rss,
          enabled:               false,
          poll_interval_minutes: 60,
          params:                SourceParams::default(),
        },
      ],
      digests: vec![DigestDef {
        digest_id:        "weekly".into(),
        name:             "Weekly".into(),
        group_id:         "team".into(),
        template_id:      "default".into(),
        sources:          vec!["feed".into()],
        selection_policy: SelectionPolicy::default(),
        frequency:        Frequency::Weekly,
        send_policy:      SendPolicy::default(),
        tracking:         TrackingPolicy::default(),
      }],
      ..Catalog::default()
    }
  }

  #[test]
  fn digest_sources_resolves_enabled() {
    let c = catalog();
    let digest = c.digest("weekly").unwrap();
    let sources = c.digest_sources(digest).unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source_id, "feed");
  }

  #[test]
  fn digest_sources_rejects_unknown_and_disabled() {
    let c = catalog();
    let mut digest = c.digest("weekly").unwrap().clone();

    digest.sources = vec!["missing".into()];
    assert!(matches!(
      c.digest_sources(&digest),
      Err(Error::UnknownSource { ref source_id, .. }) if source_id == "missing"
    ));

    digest.sources = vec!["old".into()];
    assert!(matches!(
      c.digest_sources(&digest),
      Err(Error::DisabledSource { ref source_id, .. }) if source_id == "old"
    ));
  }

  #[test]
  fn missing_lookups_are_descriptive() {
    let c = catalog();
    assert!(matches!(c.digest("nope"), Err(Error::DigestNotFound(_))));
    assert!(matches!(c.template("nope"), Err(Error::TemplateNotFound(_))));
    assert!(matches!(c.group("nope"), Err(Error::GroupNotFound(_))));
  }

  #[test]
  fn digest_defaults_fill_in() {
    let json = r#"{
      "digest_id": "d", "name": "D", "group_id": "g", "template_id": "t",
      "frequency": "daily"
    }"#;
    let digest: DigestDef = serde_json::from_str(json).unwrap();
    assert_eq!(digest.selection_policy.window_days, 2);
    assert_eq!(digest.selection_policy.max_items_total, 20);
    assert_eq!(digest.send_policy.send_time_local, "08:00");
    assert!(digest.tracking.open_tracking);
  }

  #[test]
  fn page_selectors_are_optional() {
    let params: SourceParams = serde_json::from_str(r#"{"url": "https://site.test/"}"#).unwrap();
    assert_eq!(params.content_css, None);
    assert!(params.remove_css.is_empty());

    let json = r#"{"url": "https://site.test/", "content_css": "main", "remove_css": ["nav"]}"#;
    let params: SourceParams = serde_json::from_str(json).unwrap();
    assert_eq!(params.content_css.as_deref(), Some("main"));
    assert_eq!(params.remove_css, ["nav"]);
  }
}
