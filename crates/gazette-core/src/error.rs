//! Error types for `gazette-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("digest not found: {0}")]
  DigestNotFound(String),

  #[error("template not found: {0}")]
  TemplateNotFound(String),

  #[error("group not found: {0}")]
  GroupNotFound(String),

  #[error("digest {digest_id} references unknown source {source_id}")]
  UnknownSource { digest_id: String, source_id: String },

  #[error("digest {digest_id} references disabled source {source_id}")]
  DisabledSource { digest_id: String, source_id: String },

  #[error("invalid send policy for digest {digest_id}: {reason}")]
  InvalidSendPolicy { digest_id: String, reason: String },

  #[error("run {run_id} cannot move from {from} to {to}")]
  InvalidTransition {
    run_id: i64,
    from:   &'static str,
    to:     &'static str,
  },

  #[error("{0} days back from now is out of range")]
  DaysOutOfRange(u32),

  #[error("tracking secret must not be empty")]
  EmptySecret,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
