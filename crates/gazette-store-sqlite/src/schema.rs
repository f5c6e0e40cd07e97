//! SQL schema for the Gazette SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema version for future migrations.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Mirrored from the catalog by sync; never edited elsewhere.
CREATE TABLE IF NOT EXISTS sources (
    source_id      TEXT PRIMARY KEY,
    kind           TEXT NOT NULL,      -- 'rss' | 'website_change'
    enabled        INTEGER NOT NULL,
    params_json    TEXT NOT NULL,
    last_polled_at TEXT
);

CREATE TABLE IF NOT EXISTS recipients (
    email        TEXT PRIMARY KEY,
    name         TEXT,
    enabled      INTEGER NOT NULL DEFAULT 1,
    unsubscribed INTEGER NOT NULL DEFAULT 0  -- never cleared
);

CREATE TABLE IF NOT EXISTS groups (
    group_id TEXT PRIMARY KEY,
    name     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES groups(group_id),
    email    TEXT NOT NULL REFERENCES recipients(email),
    enabled  INTEGER NOT NULL DEFAULT 1,
    position INTEGER NOT NULL,
    PRIMARY KEY (group_id, email)
);

-- Timestamps are fixed-width RFC 3339 UTC, so text order is time order.
CREATE TABLE IF NOT EXISTS content_units (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id    TEXT NOT NULL,
    title        TEXT NOT NULL,
    body_text    TEXT NOT NULL,
    url          TEXT,
    published_at TEXT,
    ingested_at  TEXT NOT NULL,
    links_json   TEXT NOT NULL DEFAULT '[]',
    fingerprint  TEXT NOT NULL,
    UNIQUE (source_id, fingerprint)
);

CREATE TABLE IF NOT EXISTS snapshots (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id    TEXT NOT NULL,
    url          TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    content_text TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS digest_runs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    digest_id    TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end   TEXT NOT NULL,
    status       TEXT NOT NULL,      -- 'created' | 'built' | 'sent'
    created_at   TEXT NOT NULL
);

-- item_id has no foreign key: units are pruned, run items are kept with a
-- copy of the fields needed to render and to guard clicks.
CREATE TABLE IF NOT EXISTS run_items (
    run_id       INTEGER NOT NULL REFERENCES digest_runs(id),
    item_id      INTEGER NOT NULL,
    rank         INTEGER NOT NULL,
    source_id    TEXT NOT NULL,
    title        TEXT NOT NULL,
    url          TEXT,
    published_at TEXT,
    summary      TEXT NOT NULL,
    links_json   TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (run_id, rank),
    UNIQUE (run_id, item_id)
);

CREATE TABLE IF NOT EXISTS deliveries (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id              INTEGER NOT NULL REFERENCES digest_runs(id),
    recipient_email     TEXT NOT NULL,
    status              TEXT NOT NULL,   -- 'sent' | 'failed'
    provider_message_id TEXT,
    error               TEXT,
    created_at          TEXT NOT NULL,
    UNIQUE (run_id, recipient_email)
);

-- Append-only.
CREATE TABLE IF NOT EXISTS engagement_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    delivery_id INTEGER NOT NULL REFERENCES deliveries(id),
    kind        TEXT NOT NULL,       -- 'open' | 'click'
    link        TEXT,
    timestamp   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS content_units_ingested_idx ON content_units(ingested_at);
CREATE INDEX IF NOT EXISTS snapshots_source_idx       ON snapshots(source_id, id);
CREATE INDEX IF NOT EXISTS digest_runs_digest_idx     ON digest_runs(digest_id, created_at);
CREATE INDEX IF NOT EXISTS deliveries_recipient_idx   ON deliveries(recipient_email, status);
CREATE INDEX IF NOT EXISTS events_timestamp_idx       ON engagement_events(timestamp);

PRAGMA user_version = 1;
";
