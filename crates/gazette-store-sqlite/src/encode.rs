//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed microsecond
//! precision and a `Z` suffix, so lexical comparison in SQL matches
//! chronological order. Lists and source parameters are stored as compact
//! JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use gazette_core::{
  catalog::SourceKind,
  content::{ContentUnit, StoredUnit},
  model::{
    DeliveryRecord, DeliveryStatus, DigestRun, GroupMember, Recipient, RunItem,
    RunStatus, Snapshot, Source,
  },
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_source_kind(s: &str) -> Result<SourceKind> {
  match s {
    "rss" => Ok(SourceKind::Rss),
    "website_change" => Ok(SourceKind::WebsiteChange),
    other => Err(unknown("sources.kind", other)),
  }
}

pub fn decode_run_status(s: &str) -> Result<RunStatus> {
  match s {
    "created" => Ok(RunStatus::Created),
    "built" => Ok(RunStatus::Built),
    "sent" => Ok(RunStatus::Sent),
    other => Err(unknown("digest_runs.status", other)),
  }
}

pub fn decode_delivery_status(s: &str) -> Result<DeliveryStatus> {
  match s {
    "pending" => Ok(DeliveryStatus::Pending),
    "sent" => Ok(DeliveryStatus::Sent),
    "failed" => Ok(DeliveryStatus::Failed),
    other => Err(unknown("deliveries.status", other)),
  }
}

fn unknown(column: &'static str, value: &str) -> Error {
  Error::UnknownValue { column, value: value.to_owned() }
}

// ─── Lists ───────────────────────────────────────────────────────────────────

pub fn encode_links(links: &[String]) -> Result<String> {
  Ok(serde_json::to_string(links)?)
}

pub fn decode_links(s: &str) -> Result<Vec<String>> { Ok(serde_json::from_str(s)?) }

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// Raw column values read from a `sources` row.
pub struct RawSource {
  pub source_id:      String,
  pub kind:           String,
  pub enabled:        bool,
  pub params_json:    String,
  pub last_polled_at: Option<String>,
}

impl RawSource {
  pub fn into_source(self) -> Result<Source> {
    Ok(Source {
      source_id:      self.source_id,
      kind:           decode_source_kind(&self.kind)?,
      enabled:        self.enabled,
      params:         serde_json::from_str(&self.params_json)?,
      last_polled_at: decode_opt_dt(self.last_polled_at)?,
    })
  }
}

/// Raw column values read from a `content_units` row.
pub struct RawUnit {
  pub id:           i64,
  pub source_id:    String,
  pub title:        String,
  pub body_text:    String,
  pub url:          Option<String>,
  pub published_at: Option<String>,
  pub ingested_at:  String,
  pub links_json:   String,
  pub fingerprint:  String,
}

impl RawUnit {
  pub fn into_stored(self) -> Result<StoredUnit> {
    Ok(StoredUnit {
      id:   self.id,
      unit: ContentUnit {
        source_id:    self.source_id,
        title:        self.title,
        body_text:    self.body_text,
        url:          self.url,
        published_at: decode_opt_dt(self.published_at)?,
        ingested_at:  decode_dt(&self.ingested_at)?,
        links:        decode_links(&self.links_json)?,
        fingerprint:  self.fingerprint,
      },
    })
  }
}

/// Raw column values read from a `snapshots` row.
pub struct RawSnapshot {
  pub source_id:    String,
  pub url:          String,
  pub content_hash: String,
  pub content_text: String,
  pub created_at:   String,
}

impl RawSnapshot {
  pub fn into_snapshot(self) -> Result<Snapshot> {
    Ok(Snapshot {
      source_id:    self.source_id,
      url:          self.url,
      content_hash: self.content_hash,
      content_text: self.content_text,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw column values read from a `digest_runs` row.
pub struct RawRun {
  pub id:           i64,
  pub digest_id:    String,
  pub period_start: String,
  pub period_end:   String,
  pub status:       String,
  pub created_at:   String,
}

impl RawRun {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      digest_id:    row.get(1)?,
      period_start: row.get(2)?,
      period_end:   row.get(3)?,
      status:       row.get(4)?,
      created_at:   row.get(5)?,
    })
  }

  pub fn into_run(self) -> Result<DigestRun> {
    Ok(DigestRun {
      id:           self.id,
      digest_id:    self.digest_id,
      period_start: decode_dt(&self.period_start)?,
      period_end:   decode_dt(&self.period_end)?,
      status:       decode_run_status(&self.status)?,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

pub const RUN_COLUMNS: &str = "id, digest_id, period_start, period_end, status, created_at";

/// Raw column values read from a `run_items` row.
pub struct RawRunItem {
  pub run_id:       i64,
  pub item_id:      i64,
  pub rank:         u32,
  pub source_id:    String,
  pub title:        String,
  pub url:          Option<String>,
  pub published_at: Option<String>,
  pub summary:      String,
  pub links_json:   String,
}

impl RawRunItem {
  pub fn into_item(self) -> Result<RunItem> {
    Ok(RunItem {
      run_id:       self.run_id,
      item_id:      self.item_id,
      rank:         self.rank,
      source_id:    self.source_id,
      title:        self.title,
      url:          self.url,
      published_at: decode_opt_dt(self.published_at)?,
      summary:      self.summary,
      links:        decode_links(&self.links_json)?,
    })
  }
}

/// Raw column values read from a `group_members` row joined to `recipients`.
pub struct RawMember {
  pub email:              String,
  pub name:               Option<String>,
  pub enabled:            bool,
  pub unsubscribed:       bool,
  pub membership_enabled: bool,
}

impl RawMember {
  pub fn into_member(self) -> GroupMember {
    GroupMember {
      recipient:          Recipient {
        email:        self.email,
        name:         self.name,
        enabled:      self.enabled,
        unsubscribed: self.unsubscribed,
      },
      membership_enabled: self.membership_enabled,
    }
  }
}

/// Raw column values read from a `deliveries` row.
pub struct RawDelivery {
  pub id:                  i64,
  pub run_id:              i64,
  pub recipient_email:     String,
  pub status:              String,
  pub provider_message_id: Option<String>,
  pub error:               Option<String>,
  pub created_at:          String,
}

impl RawDelivery {
  pub fn into_record(self) -> Result<DeliveryRecord> {
    Ok(DeliveryRecord {
      id:                  self.id,
      run_id:              self.run_id,
      recipient:           self.recipient_email,
      status:              decode_delivery_status(&self.status)?,
      provider_message_id: self.provider_message_id,
      error:               self.error,
      created_at:          decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_as_text() {
    let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
    let late = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
    assert!(encode_dt(early) < encode_dt(late));
    assert_eq!(encode_dt(late), "2024-01-10T00:00:00.000000Z");
    assert_eq!(decode_dt(&encode_dt(late)).unwrap(), late);
  }

  #[test]
  fn unknown_enum_values_are_errors() {
    assert!(matches!(
      decode_run_status("archived"),
      Err(Error::UnknownValue { column: "digest_runs.status", .. })
    ));
  }
}
