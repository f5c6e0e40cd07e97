//! Unsubscribe handler.

use axum::{
  extract::{Path, State},
  response::Html,
};
use gazette_core::{store::DigestStore, token::TokenPurpose};

use crate::{TrackingState, error::TrackingError};

const CONFIRMATION: &str =
  "<html><body><h3>You have been unsubscribed.</h3></body></html>";

/// `GET /unsubscribe/{token}`. Marks the recipient permanently
/// unsubscribed.
pub async fn handler<S>(
  State(state): State<TrackingState<S>>,
  Path(token): Path<String>,
) -> Result<Html<&'static str>, TrackingError>
where
  S: DigestStore + 'static,
{
  let claims = state.verify(&token)?;
  if claims.purpose() != TokenPurpose::Unsubscribe {
    return Err(TrackingError::Invalid);
  }

  let known = state
    .store
    .unsubscribe(claims.email)
    .await
    .map_err(TrackingError::store)?;
  if known {
    tracing::info!(run_id = claims.run_id, "recipient unsubscribed");
  }
  Ok(Html(CONFIRMATION))
}
