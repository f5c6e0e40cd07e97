//! [`SqliteStore`]: the SQLite implementation of [`DigestStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use gazette_core::{
  catalog::{GroupDef, SourceDef},
  content::{ContentUnit, StoredUnit},
  delivery::should_disable,
  model::{
    DeliveryAttempt, DeliveryRecord, DeliveryStatus, DigestRun, EngagementEvent,
    GroupMember, NewRun, PruneStats, RecordedDelivery, ReportCounts, RunItem,
    RunStatus, Snapshot, Source,
  },
  store::{DigestStore, InsertOutcome, NewRunItem},
};

use crate::{
  Error, Result,
  encode::{
    RUN_COLUMNS, RawDelivery, RawMember, RawRun, RawRunItem, RawSnapshot, RawSource,
    RawUnit, decode_run_status, encode_dt, encode_links,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A digest store backed by a single SQLite file.
///
/// Clones share the inner connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Result of a guarded status change, decided inside the transaction.
enum Transition {
  Missing,
  Blocked(String),
  Done(RawRun),
}

/// A content unit with its list and timestamp columns pre-encoded.
struct EncodedUnit {
  source_id:    String,
  title:        String,
  body_text:    String,
  url:          Option<String>,
  published_at: Option<String>,
  ingested_at:  String,
  links_json:   String,
  fingerprint:  String,
}

impl EncodedUnit {
  fn new(unit: ContentUnit) -> Result<Self> {
    Ok(Self {
      links_json:   encode_links(&unit.links)?,
      published_at: unit.published_at.map(encode_dt),
      ingested_at:  encode_dt(unit.ingested_at),
      source_id:    unit.source_id,
      title:        unit.title,
      body_text:    unit.body_text,
      url:          unit.url,
      fingerprint:  unit.fingerprint,
    })
  }
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Run raw SQL against the connection.
  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
    self.conn.call(move |conn| Ok(conn.execute_batch(sql)?)).await?;
    Ok(())
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Move a run to `next` inside one transaction, running `before` (e.g.
  /// item inserts) in the same transaction when the move is allowed.
  async fn transition<F>(&self, run_id: i64, next: RunStatus, before: F) -> Result<DigestRun>
  where
    F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<()> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT status FROM digest_runs WHERE id = ?1",
            rusqlite::params![run_id],
            |r| r.get(0),
          )
          .optional()?;

        let Some(current) = current else {
          return Ok(Transition::Missing);
        };
        let allowed = decode_run_status(&current)
          .map(|status| status.can_advance_to(next))
          .unwrap_or(false);
        if !allowed {
          return Ok(Transition::Blocked(current));
        }

        before(&tx)?;
        tx.execute(
          "UPDATE digest_runs SET status = ?1 WHERE id = ?2",
          rusqlite::params![next.as_str(), run_id],
        )?;
        let raw = tx.query_row(
          &format!("SELECT {RUN_COLUMNS} FROM digest_runs WHERE id = ?1"),
          rusqlite::params![run_id],
          RawRun::from_row,
        )?;
        tx.commit()?;
        Ok(Transition::Done(raw))
      })
      .await?;

    match outcome {
      Transition::Missing => Err(Error::RunNotFound(run_id)),
      Transition::Blocked(current) => {
        let from = decode_run_status(&current)?;
        Err(Error::Core(gazette_core::Error::InvalidTransition {
          run_id,
          from: from.as_str(),
          to: next.as_str(),
        }))
      }
      Transition::Done(raw) => raw.into_run(),
    }
  }
}

// ─── DigestStore impl ────────────────────────────────────────────────────────

impl DigestStore for SqliteStore {
  type Error = Error;

  // ── Sync from configuration ───────────────────────────────────────────────

  async fn sync_sources(&self, sources: Vec<SourceDef>) -> Result<()> {
    let rows = sources
      .into_iter()
      .map(|s| {
        Ok((
          s.source_id,
          s.kind.as_str(),
          s.enabled,
          serde_json::to_string(&s.params)?,
        ))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for (source_id, kind, enabled, params_json) in rows {
          tx.execute(
            "INSERT INTO sources (source_id, kind, enabled, params_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (source_id) DO UPDATE SET
               kind        = excluded.kind,
               enabled     = excluded.enabled,
               params_json = excluded.params_json",
            rusqlite::params![source_id, kind, enabled, params_json],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn sync_groups(&self, groups: Vec<GroupDef>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for group in groups {
          tx.execute(
            "INSERT INTO groups (group_id, name) VALUES (?1, ?2)
             ON CONFLICT (group_id) DO UPDATE SET name = excluded.name",
            rusqlite::params![group.group_id, group.name],
          )?;

          for (position, member) in group.members.into_iter().enumerate() {
            // `unsubscribed` is never touched here.
            tx.execute(
              "INSERT INTO recipients (email, name, enabled) VALUES (?1, ?2, COALESCE(?3, 1))
               ON CONFLICT (email) DO UPDATE SET
                 name    = COALESCE(excluded.name, recipients.name),
                 enabled = COALESCE(?3, recipients.enabled)",
              rusqlite::params![member.email, member.name, member.enabled],
            )?;
            tx.execute(
              "INSERT INTO group_members (group_id, email, enabled, position)
               VALUES (?1, ?2, COALESCE(?3, 1), ?4)
               ON CONFLICT (group_id, email) DO UPDATE SET
                 enabled  = COALESCE(?3, group_members.enabled),
                 position = excluded.position",
              rusqlite::params![group.group_id, member.email, member.enabled, position as i64],
            )?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Sources and content ───────────────────────────────────────────────────

  async fn list_sources(&self) -> Result<Vec<Source>> {
    let raws: Vec<RawSource> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT source_id, kind, enabled, params_json, last_polled_at
           FROM sources ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawSource {
              source_id:      row.get(0)?,
              kind:           row.get(1)?,
              enabled:        row.get(2)?,
              params_json:    row.get(3)?,
              last_polled_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSource::into_source).collect()
  }

  async fn mark_polled(&self, source_id: String, at: DateTime<Utc>) -> Result<()> {
    let at_str = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE sources SET last_polled_at = ?1 WHERE source_id = ?2",
          rusqlite::params![at_str, source_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn units_in_window(
    &self,
    source_ids: Vec<String>,
    start:      DateTime<Utc>,
    end:        DateTime<Utc>,
  ) -> Result<Vec<StoredUnit>> {
    if source_ids.is_empty() {
      return Ok(Vec::new());
    }

    let placeholders = (0..source_ids.len())
      .map(|i| format!("?{}", i + 3))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!(
      "SELECT id, source_id, title, body_text, url, published_at,
              ingested_at, links_json, fingerprint
       FROM content_units
       WHERE ingested_at >= ?1 AND ingested_at <= ?2 AND source_id IN ({placeholders})
       ORDER BY id"
    );
    let mut params = vec![encode_dt(start), encode_dt(end)];
    params.extend(source_ids);

    let raws: Vec<RawUnit> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RawUnit {
              id:           row.get(0)?,
              source_id:    row.get(1)?,
              title:        row.get(2)?,
              body_text:    row.get(3)?,
              url:          row.get(4)?,
              published_at: row.get(5)?,
              ingested_at:  row.get(6)?,
              links_json:   row.get(7)?,
              fingerprint:  row.get(8)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUnit::into_stored).collect()
  }

  async fn latest_snapshot(&self, source_id: String) -> Result<Option<Snapshot>> {
    let raw: Option<RawSnapshot> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT source_id, url, content_hash, content_text, created_at
             FROM snapshots WHERE source_id = ?1
             ORDER BY id DESC LIMIT 1",
            rusqlite::params![source_id],
            |row| {
              Ok(RawSnapshot {
                source_id:    row.get(0)?,
                url:          row.get(1)?,
                content_hash: row.get(2)?,
                content_text: row.get(3)?,
                created_at:   row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  async fn commit_poll(
    &self,
    units:     Vec<ContentUnit>,
    snapshots: Vec<Snapshot>,
  ) -> Result<InsertOutcome> {
    let encoded = units
      .into_iter()
      .map(EncodedUnit::new)
      .collect::<Result<Vec<_>>>()?;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for snapshot in &snapshots {
          tx.execute(
            "INSERT INTO snapshots (source_id, url, content_hash, content_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
              snapshot.source_id,
              snapshot.url,
              snapshot.content_hash,
              snapshot.content_text,
              encode_dt(snapshot.created_at),
            ],
          )?;
        }

        let mut outcome = InsertOutcome::default();
        for u in encoded {
          let changed = tx.execute(
            "INSERT OR IGNORE INTO content_units (
               source_id, title, body_text, url, published_at,
               ingested_at, links_json, fingerprint
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
              u.source_id,
              u.title,
              u.body_text,
              u.url,
              u.published_at,
              u.ingested_at,
              u.links_json,
              u.fingerprint,
            ],
          )?;
          if changed == 0 {
            outcome.duplicates += 1;
          } else {
            outcome.inserted += 1;
          }
        }
        tx.commit()?;
        Ok(outcome)
      })
      .await?;
    Ok(outcome)
  }

  // ── Runs ──────────────────────────────────────────────────────────────────

  async fn create_run(&self, run: NewRun) -> Result<DigestRun> {
    let digest_id = run.digest_id.clone();
    let start = encode_dt(run.period_start);
    let end = encode_dt(run.period_end);
    let created = encode_dt(run.created_at);

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO digest_runs (digest_id, period_start, period_end, status, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![digest_id, start, end, RunStatus::Created.as_str(), created],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(DigestRun {
      id,
      digest_id: run.digest_id,
      period_start: run.period_start,
      period_end: run.period_end,
      status: RunStatus::Created,
      created_at: run.created_at,
    })
  }

  async fn complete_build(&self, run_id: i64, items: Vec<NewRunItem>) -> Result<DigestRun> {
    let rows = items
      .into_iter()
      .map(|item| {
        let unit = item.item.unit;
        Ok((
          item.item.id,
          item.rank,
          unit.source_id,
          unit.title,
          unit.url,
          unit.published_at.map(encode_dt),
          item.summary,
          encode_links(&unit.links)?,
        ))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .transition(run_id, RunStatus::Built, move |tx| {
        for (item_id, rank, source_id, title, url, published_at, summary, links_json) in rows {
          tx.execute(
            "INSERT INTO run_items (
               run_id, item_id, rank, source_id, title, url,
               published_at, summary, links_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
              run_id,
              item_id,
              rank,
              source_id,
              title,
              url,
              published_at,
              summary,
              links_json,
            ],
          )?;
        }
        Ok(())
      })
      .await
  }

  async fn get_run(&self, run_id: i64) -> Result<Option<DigestRun>> {
    let raw: Option<RawRun> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM digest_runs WHERE id = ?1"),
            rusqlite::params![run_id],
            RawRun::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRun::into_run).transpose()
  }

  async fn latest_run(&self, digest_id: String) -> Result<Option<DigestRun>> {
    let raw: Option<RawRun> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {RUN_COLUMNS} FROM digest_runs WHERE digest_id = ?1
               ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            rusqlite::params![digest_id],
            RawRun::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRun::into_run).transpose()
  }

  async fn run_items(&self, run_id: i64) -> Result<Vec<RunItem>> {
    let raws: Vec<RawRunItem> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT run_id, item_id, rank, source_id, title, url,
                  published_at, summary, links_json
           FROM run_items WHERE run_id = ?1 ORDER BY rank",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![run_id], |row| {
            Ok(RawRunItem {
              run_id:       row.get(0)?,
              item_id:      row.get(1)?,
              rank:         row.get(2)?,
              source_id:    row.get(3)?,
              title:        row.get(4)?,
              url:          row.get(5)?,
              published_at: row.get(6)?,
              summary:      row.get(7)?,
              links_json:   row.get(8)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRunItem::into_item).collect()
  }

  async fn advance_run(&self, run_id: i64, status: RunStatus) -> Result<DigestRun> {
    self.transition(run_id, status, |_| Ok(())).await
  }

  // ── Recipients and deliveries ─────────────────────────────────────────────

  async fn group_members(&self, group_id: String) -> Result<Vec<GroupMember>> {
    let raws: Vec<RawMember> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT r.email, r.name, r.enabled, r.unsubscribed, m.enabled
           FROM group_members m JOIN recipients r ON r.email = m.email
           WHERE m.group_id = ?1
           ORDER BY m.position, m.email",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![group_id], |row| {
            Ok(RawMember {
              email:              row.get(0)?,
              name:               row.get(1)?,
              enabled:            row.get(2)?,
              unsubscribed:       row.get(3)?,
              membership_enabled: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(raws.into_iter().map(RawMember::into_member).collect())
  }

  async fn find_delivery(
    &self,
    run_id:    i64,
    recipient: String,
  ) -> Result<Option<DeliveryRecord>> {
    let raw: Option<RawDelivery> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT id, run_id, recipient_email, status, provider_message_id, error, created_at
             FROM deliveries WHERE run_id = ?1 AND recipient_email = ?2",
            rusqlite::params![run_id, recipient],
            |row| {
              Ok(RawDelivery {
                id:                  row.get(0)?,
                run_id:              row.get(1)?,
                recipient_email:     row.get(2)?,
                status:              row.get(3)?,
                provider_message_id: row.get(4)?,
                error:               row.get(5)?,
                created_at:          row.get(6)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawDelivery::into_record).transpose()
  }

  async fn record_delivery(
    &self,
    attempt:           DeliveryAttempt,
    failure_threshold: u32,
  ) -> Result<RecordedDelivery> {
    if !attempt.status.is_terminal() {
      return Err(Error::NonTerminalDelivery {
        run_id:    attempt.run_id,
        recipient: attempt.recipient,
      });
    }
    let failed = attempt.status == DeliveryStatus::Failed;
    let created_at = encode_dt(attempt.created_at);

    let recorded = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "INSERT OR IGNORE INTO deliveries (
             run_id, recipient_email, status, provider_message_id, error, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            attempt.run_id,
            attempt.recipient,
            attempt.status.as_str(),
            attempt.provider_message_id,
            attempt.error,
            created_at,
          ],
        )?;

        let failures: i64 = tx.query_row(
          "SELECT COUNT(*) FROM deliveries WHERE recipient_email = ?1 AND status = 'failed'",
          rusqlite::params![attempt.recipient],
          |r| r.get(0),
        )?;
        let failures = u32::try_from(failures).unwrap_or(u32::MAX);

        let mut recipient_disabled = false;
        if changed > 0 && failed && should_disable(failures, failure_threshold) {
          recipient_disabled = tx.execute(
            "UPDATE recipients SET enabled = 0 WHERE email = ?1 AND enabled = 1",
            rusqlite::params![attempt.recipient],
          )? > 0;
        }

        tx.commit()?;
        Ok(RecordedDelivery { inserted: changed > 0, failures, recipient_disabled })
      })
      .await?;
    Ok(recorded)
  }

  async fn unsubscribe(&self, email: String) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE recipients SET unsubscribed = 1, enabled = 0 WHERE email = ?1",
          rusqlite::params![email],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  // ── Engagement ────────────────────────────────────────────────────────────

  async fn record_event(&self, event: EngagementEvent) -> Result<()> {
    let timestamp = encode_dt(event.timestamp);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO engagement_events (delivery_id, kind, link, timestamp)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![event.delivery_id, event.kind.as_str(), event.link, timestamp],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Maintenance ───────────────────────────────────────────────────────────

  async fn prune(&self, cutoff: DateTime<Utc>) -> Result<PruneStats> {
    let cutoff = encode_dt(cutoff);
    let stats = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let events = tx.execute(
          "DELETE FROM engagement_events WHERE timestamp < ?1",
          rusqlite::params![cutoff],
        )?;
        let snapshots = tx.execute(
          "DELETE FROM snapshots WHERE created_at < ?1",
          rusqlite::params![cutoff],
        )?;
        let items = tx.execute(
          "DELETE FROM content_units WHERE ingested_at < ?1",
          rusqlite::params![cutoff],
        )?;
        tx.commit()?;
        Ok(PruneStats { events, snapshots, items })
      })
      .await?;
    Ok(stats)
  }

  async fn report(&self, digest_id: String, since: DateTime<Utc>) -> Result<ReportCounts> {
    let since = encode_dt(since);
    let counts: (i64, i64, i64, i64, i64) = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "WITH runs AS (
             SELECT id FROM digest_runs WHERE digest_id = ?1 AND created_at >= ?2
           ),
           dels AS (
             SELECT id, status FROM deliveries WHERE run_id IN (SELECT id FROM runs)
           )
           SELECT
             (SELECT COUNT(*) FROM runs),
             (SELECT COUNT(*) FROM dels WHERE status = 'sent'),
             (SELECT COUNT(*) FROM dels WHERE status = 'failed'),
             (SELECT COUNT(*) FROM engagement_events
                WHERE kind = 'open' AND timestamp >= ?2
                  AND delivery_id IN (SELECT id FROM dels)),
             (SELECT COUNT(*) FROM engagement_events
                WHERE kind = 'click' AND timestamp >= ?2
                  AND delivery_id IN (SELECT id FROM dels))",
          rusqlite::params![digest_id, since],
          |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )?)
      })
      .await?;

    let n = |v: i64| u64::try_from(v).unwrap_or(0);
    Ok(ReportCounts {
      runs:   n(counts.0),
      sent:   n(counts.1),
      failed: n(counts.2),
      opens:  n(counts.3),
      clicks: n(counts.4),
    })
  }
}
