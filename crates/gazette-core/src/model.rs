//! Persisted records: sources, recipients, runs, run items, deliveries, and
//! engagement events.
//!
//! Relationships are expressed with keys (`source_id`, `group_id`, `run_id`,
//! recipient email), never with embedded references. All traversal goes
//! through [`crate::store::DigestStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{SourceKind, SourceParams};

// ─── Sources ─────────────────────────────────────────────────────────────────

/// A source as mirrored into the store by the sync step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
  pub source_id:      String,
  pub kind:           SourceKind,
  pub enabled:        bool,
  pub params:         SourceParams,
  pub last_polled_at: Option<DateTime<Utc>>,
}

/// The most recent text of a watched page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
  pub source_id:    String,
  pub url:          String,
  pub content_hash: String,
  pub content_text: String,
  pub created_at:   DateTime<Utc>,
}

// ─── Recipients ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
  pub email:        String,
  pub name:         Option<String>,
  /// Cleared by the failure circuit-breaker; re-enabled only by an operator.
  pub enabled:      bool,
  /// Permanent; wins over `enabled`.
  pub unsubscribed: bool,
}

/// A recipient as seen through one group's membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
  pub recipient:          Recipient,
  pub membership_enabled: bool,
}

impl GroupMember {
  /// Whether the dispatch loop may deliver to this member.
  pub fn is_eligible(&self) -> bool {
    self.membership_enabled
      && self.recipient.enabled
      && !self.recipient.unsubscribed
  }
}

// ─── Runs ────────────────────────────────────────────────────────────────────

/// Run status. Ordering follows the only permitted direction of travel.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
  Created,
  Built,
  Sent,
}

impl RunStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Created => "created",
      Self::Built => "built",
      Self::Sent => "sent",
    }
  }

  /// Strictly forward; a status is never revisited.
  pub fn can_advance_to(self, next: Self) -> bool { next > self }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRun {
  pub id:           i64,
  pub digest_id:    String,
  pub period_start: DateTime<Utc>,
  pub period_end:   DateTime<Utc>,
  pub status:       RunStatus,
  pub created_at:   DateTime<Utc>,
}

/// Input to [`crate::store::DigestStore::create_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
  pub digest_id:    String,
  pub period_start: DateTime<Utc>,
  pub period_end:   DateTime<Utc>,
  pub created_at:   DateTime<Utc>,
}

/// One ranked entry of a built run. Carries a copy of the unit's display
/// fields so the run stays renderable after retention prunes the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunItem {
  pub run_id:       i64,
  pub item_id:      i64,
  /// 1-based, unique within the run.
  pub rank:         u32,
  pub source_id:    String,
  pub title:        String,
  pub url:          Option<String>,
  pub published_at: Option<DateTime<Utc>>,
  pub summary:      String,
  pub links:        Vec<String>,
}

// ─── Deliveries ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
  Pending,
  Sent,
  Failed,
}

impl DeliveryStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Sent => "sent",
      Self::Failed => "failed",
    }
  }

  pub fn is_terminal(self) -> bool { !matches!(self, Self::Pending) }
}

/// A persisted delivery. Unique per `(run_id, recipient)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
  pub id:                  i64,
  pub run_id:              i64,
  pub recipient:           String,
  pub status:              DeliveryStatus,
  pub provider_message_id: Option<String>,
  pub error:               Option<String>,
  pub created_at:          DateTime<Utc>,
}

/// One delivery attempt, built in memory as `pending` and moved to exactly
/// one terminal status before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
  pub run_id:              i64,
  pub recipient:           String,
  pub status:              DeliveryStatus,
  pub provider_message_id: Option<String>,
  pub error:               Option<String>,
  pub created_at:          DateTime<Utc>,
}

impl DeliveryAttempt {
  pub fn pending(run_id: i64, recipient: impl Into<String>, at: DateTime<Utc>) -> Self {
    Self {
      run_id,
      recipient: recipient.into(),
      status: DeliveryStatus::Pending,
      provider_message_id: None,
      error: None,
      created_at: at,
    }
  }

  pub fn sent(self, provider_message_id: impl Into<String>) -> Self {
    Self {
      status: DeliveryStatus::Sent,
      provider_message_id: Some(provider_message_id.into()),
      error: None,
      ..self
    }
  }

  pub fn failed(self, error: impl Into<String>) -> Self {
    Self {
      status: DeliveryStatus::Failed,
      provider_message_id: None,
      error: Some(error.into()),
      ..self
    }
  }
}

/// What the store did with a [`DeliveryAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordedDelivery {
  /// `false` when a record for the run and recipient already existed.
  pub inserted:           bool,
  /// The recipient's failed deliveries across all runs, after this one.
  pub failures:           u32,
  /// Whether this attempt tripped the failure threshold.
  pub recipient_disabled: bool,
}

// ─── Engagement ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementKind {
  Open,
  Click,
}

impl EngagementKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Open => "open",
      Self::Click => "click",
    }
  }
}

/// Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementEvent {
  pub delivery_id: i64,
  pub kind:        EngagementKind,
  pub link:        Option<String>,
  pub timestamp:   DateTime<Utc>,
}

// ─── Maintenance ─────────────────────────────────────────────────────────────

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PruneStats {
  pub events:    usize,
  pub snapshots: usize,
  pub items:     usize,
}

/// Engagement counts for one digest over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReportCounts {
  pub runs:   u64,
  pub sent:   u64,
  pub failed: u64,
  pub opens:  u64,
  pub clicks: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn run_status_only_moves_forward() {
    use RunStatus::*;
    assert!(Created.can_advance_to(Built));
    assert!(Built.can_advance_to(Sent));
    assert!(Created.can_advance_to(Sent));
    assert!(!Built.can_advance_to(Created));
    assert!(!Sent.can_advance_to(Sent));
  }

  #[test]
  fn unsubscribed_beats_enabled() {
    let member = GroupMember {
      recipient:          Recipient {
        email:        "a@example.com".into(),
        name:         None,
        enabled:      true,
        unsubscribed: true,
      },
      membership_enabled: true,
    };
    assert!(!member.is_eligible());
  }

  #[test]
  fn attempt_moves_to_one_terminal_status() {
    let at = Utc::now();
    let sent = DeliveryAttempt::pending(1, "a@example.com", at).sent("msg-1");
    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert_eq!(sent.provider_message_id.as_deref(), Some("msg-1"));

    let failed = DeliveryAttempt::pending(1, "a@example.com", at).failed("bounced");
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert!(failed.status.is_terminal());
    assert_eq!(failed.error.as_deref(), Some("bounced"));
  }
}
