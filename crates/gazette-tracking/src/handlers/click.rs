//! Click-redirect handler.

use axum::{
  extract::{Path, Query, State},
  response::{IntoResponse, Redirect, Response},
};
use gazette_core::{
  links::is_allowed_link,
  model::{EngagementEvent, EngagementKind},
  store::DigestStore,
  token::TokenPurpose,
};
use serde::Deserialize;

use crate::{TrackingState, error::TrackingError};

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
  /// The target as written into the message. Must match the signed link.
  pub u: Option<String>,
}

/// `GET /t/click/{token}?u={target}`. Redirects only to a link the token
/// signs and the run actually contains.
pub async fn handler<S>(
  State(state): State<TrackingState<S>>,
  Path(token): Path<String>,
  Query(query): Query<ClickQuery>,
) -> Result<Response, TrackingError>
where
  S: DigestStore + 'static,
{
  let claims = state.verify(&token)?;
  let TokenPurpose::Click(target) = claims.purpose() else {
    return Err(TrackingError::Invalid);
  };
  if query.u.as_deref().is_some_and(|u| u != target) {
    tracing::warn!(run_id = claims.run_id, "click target does not match token");
    return Err(TrackingError::Invalid);
  }

  let items = state
    .store
    .run_items(claims.run_id)
    .await
    .map_err(TrackingError::store)?;
  if !is_allowed_link(&items, target) {
    tracing::warn!(run_id = claims.run_id, link = target, "click target not in run");
    return Err(TrackingError::Invalid);
  }

  let delivery = state
    .store
    .find_delivery(claims.run_id, claims.email.clone())
    .await
    .map_err(TrackingError::store)?;
  if let Some(delivery) = delivery {
    state
      .store
      .record_event(EngagementEvent {
        delivery_id: delivery.id,
        kind:        EngagementKind::Click,
        link:        Some(target.to_owned()),
        timestamp:   state.clock.now(),
      })
      .await
      .map_err(TrackingError::store)?;
  }

  Ok(Redirect::temporary(target).into_response())
}
