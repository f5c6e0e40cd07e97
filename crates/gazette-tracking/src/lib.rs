//! Public tracking endpoints for Gazette.
//!
//! Exposes an axum [`Router`] with the open pixel, click redirect, and
//! unsubscribe endpoints, backed by any [`DigestStore`]. Every request
//! carries a signed token; a token that fails verification, has the wrong
//! purpose, or points outside its run gets the same generic `400 invalid`
//! (the open pixel is served regardless) and changes nothing.

pub mod error;
pub mod handlers;

pub use error::TrackingError;

use std::sync::Arc;

use axum::{Router, routing::get};
use gazette_core::{
  clock::Clock,
  store::DigestStore,
  token::{TokenClaims, TokenCodec},
};
use tower_http::trace::TraceLayer;

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct TrackingState<S: DigestStore> {
  pub store: Arc<S>,
  pub codec: Arc<TokenCodec>,
  pub clock: Arc<dyn Clock>,
}

impl<S: DigestStore> Clone for TrackingState<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      codec: Arc::clone(&self.codec),
      clock: Arc::clone(&self.clock),
    }
  }
}

impl<S: DigestStore> TrackingState<S> {
  pub fn new(store: Arc<S>, codec: TokenCodec, clock: Arc<dyn Clock>) -> Self {
    Self { store, codec: Arc::new(codec), clock }
  }

  /// Verify a token against the current time, logging the reason for a
  /// rejection but returning only [`TrackingError::Invalid`].
  pub fn verify(&self, token: &str) -> Result<TokenClaims, TrackingError> {
    self.codec.verify(token, self.clock.now()).map_err(|e| {
      tracing::warn!(reason = %e, "token rejected");
      TrackingError::Invalid
    })
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the tracking [`Router`].
pub fn router<S>(state: TrackingState<S>) -> Router
where
  S: DigestStore + 'static,
{
  Router::new()
    .route("/t/open/{file}",      get(handlers::open::handler::<S>))
    .route("/t/click/{token}",    get(handlers::click::handler::<S>))
    .route("/unsubscribe/{token}", get(handlers::unsubscribe::handler::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
