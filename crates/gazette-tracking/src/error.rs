//! Error types and axum `IntoResponse` implementation.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
  /// Bad signature, expired token, wrong purpose, or a click target outside
  /// the run. Callers never learn which.
  #[error("invalid")]
  Invalid,
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TrackingError {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

impl IntoResponse for TrackingError {
  fn into_response(self) -> Response {
    match self {
      TrackingError::Invalid => (StatusCode::BAD_REQUEST, "invalid").into_response(),
      TrackingError::Store(e) => {
        tracing::error!(error = %e, "tracking store failure");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
      }
    }
  }
}
