//! Open-pixel handler.

use axum::{
  extract::{Path, State},
  http::header,
  response::{IntoResponse, Response},
};
use gazette_core::{
  model::{EngagementEvent, EngagementKind},
  store::DigestStore,
  token::TokenPurpose,
};

use crate::{TrackingState, error::TrackingError};

/// A 1x1 transparent PNG.
pub const PIXEL: &[u8] = &[
  0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
  0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x04, 0x00, 0x00,
  0x00, 0xb5, 0x1c, 0x0c, 0x02, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x78,
  0xda, 0x63, 0xfc, 0xff, 0x1f, 0x00, 0x03, 0x03, 0x02, 0x00, 0xef, 0xa8, 0xdd, 0x7f,
  0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// `GET /t/open/{token}.png`. Always answers with the pixel; the event is
/// recorded only for a valid open token whose delivery exists.
pub async fn handler<S>(
  State(state): State<TrackingState<S>>,
  Path(file): Path<String>,
) -> Response
where
  S: DigestStore + 'static,
{
  let token = file.strip_suffix(".png").unwrap_or(&file);
  if let Err(e) = record_open(&state, token).await {
    tracing::warn!(error = %e, "open not recorded");
  }
  ([(header::CONTENT_TYPE, "image/png"), (header::CACHE_CONTROL, "no-store")], PIXEL)
    .into_response()
}

async fn record_open<S>(state: &TrackingState<S>, token: &str) -> Result<(), TrackingError>
where
  S: DigestStore + 'static,
{
  let claims = state.verify(token)?;
  if claims.purpose() != TokenPurpose::Open {
    return Err(TrackingError::Invalid);
  }

  let delivery = state
    .store
    .find_delivery(claims.run_id, claims.email)
    .await
    .map_err(TrackingError::store)?;
  let Some(delivery) = delivery else {
    return Ok(());
  };

  state
    .store
    .record_event(EngagementEvent {
      delivery_id: delivery.id,
      kind:        EngagementKind::Open,
      link:        None,
      timestamp:   state.clock.now(),
    })
    .await
    .map_err(TrackingError::store)
}
