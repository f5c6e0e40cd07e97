//! Error types for the `gazette` application crate.

use gazette_core::{model::RunStatus, render::RenderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] gazette_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("source not found: {0}")]
  SourceNotFound(String),

  #[error("run not found: {0}")]
  RunNotFound(i64),

  #[error("run {run_id} is {status:?} and cannot be sent yet")]
  RunNotBuilt { run_id: i64, status: RunStatus },

  #[error("tracking.secret must be set for this command")]
  MissingSecret,

  #[error(transparent)]
  Render(#[from] RenderError),

  #[error("mail setup failed: {0}")]
  MailSetup(String),

  #[error("http client setup failed: {0}")]
  Http(#[from] reqwest::Error),
}

impl Error {
  /// Box any store backend's error.
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
