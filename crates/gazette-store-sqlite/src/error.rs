//! Error type for `gazette-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] gazette_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored enum column held a value this version does not know.
  #[error("unknown {column} value: {value:?}")]
  UnknownValue { column: &'static str, value: String },

  #[error("run not found: {0}")]
  RunNotFound(i64),

  /// Only `sent` and `failed` attempts are ever persisted.
  #[error("delivery for run {run_id} to {recipient} has no final status")]
  NonTerminalDelivery { run_id: i64, recipient: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
