//! Signed capability tokens for the tracking and unsubscribe endpoints.
//!
//! Wire format: `base64url(json ‖ hmac_sha256(secret, json))`, where the JSON
//! payload is `{email, run_id, link, exp}`. The `link` field carries the
//! token's purpose: `null` for the open pixel, a URL for a click, and
//! [`UNSUBSCRIBE_LINK`] for unsubscribe.

use base64::{
  Engine as _,
  alphabet,
  engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// `link` value marking an unsubscribe token.
pub const UNSUBSCRIBE_LINK: &str = "unsubscribe";

/// Length of the trailing HMAC-SHA256 tag.
pub const SIGNATURE_LEN: usize = 32;

pub const DEFAULT_VALIDITY: TimeDelta = TimeDelta::days(40);

/// Padded on encode, padding optional on decode.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
  &alphabet::URL_SAFE,
  GeneralPurposeConfig::new()
    .with_encode_padding(true)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
  pub email:  String,
  pub run_id: i64,
  pub link:   Option<String>,
  /// Expiry, epoch seconds.
  pub exp:    i64,
}

/// What a token authorises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose<'a> {
  Open,
  Click(&'a str),
  Unsubscribe,
}

impl TokenPurpose<'_> {
  fn link(self) -> Option<String> {
    match self {
      Self::Open => None,
      Self::Click(url) => Some(url.to_owned()),
      Self::Unsubscribe => Some(UNSUBSCRIBE_LINK.to_owned()),
    }
  }
}

impl TokenClaims {
  pub fn purpose(&self) -> TokenPurpose<'_> {
    match self.link.as_deref() {
      None => TokenPurpose::Open,
      Some(UNSUBSCRIBE_LINK) => TokenPurpose::Unsubscribe,
      Some(url) => TokenPurpose::Click(url),
    }
  }
}

/// Why a token was rejected. Endpoints collapse all of these into one
/// generic response; the distinction is for logs and tests.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
  #[error("token is malformed")]
  Malformed,
  #[error("token signature does not match")]
  BadSignature,
  #[error("token has expired")]
  Expired,
}

/// Issues and verifies tokens under one secret.
#[derive(Clone)]
pub struct TokenCodec {
  mac: HmacSha256,
}

impl std::fmt::Debug for TokenCodec {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TokenCodec").finish_non_exhaustive()
  }
}

impl TokenCodec {
  pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
    let secret = secret.as_ref();
    if secret.is_empty() {
      return Err(Error::EmptySecret);
    }
    let mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::EmptySecret)?;
    Ok(Self { mac })
  }

  /// Issue a token for `email` on `run_id`, expiring [`DEFAULT_VALIDITY`]
  /// after `now`.
  pub fn issue(
    &self,
    email:   &str,
    run_id:  i64,
    purpose: TokenPurpose<'_>,
    now:     DateTime<Utc>,
  ) -> Result<String> {
    self.sign(&TokenClaims {
      email: email.to_owned(),
      run_id,
      link: purpose.link(),
      exp: (now + DEFAULT_VALIDITY).timestamp(),
    })
  }

  pub fn sign(&self, claims: &TokenClaims) -> Result<String> {
    let mut raw = serde_json::to_vec(claims)?;
    let mut mac = self.mac.clone();
    mac.update(&raw);
    raw.extend_from_slice(&mac.finalize().into_bytes());
    Ok(TOKEN_ENGINE.encode(raw))
  }

  /// Decode and check a token. The signature is checked before the payload
  /// is parsed, and compared in constant time.
  pub fn verify(
    &self,
    token: &str,
    now: DateTime<Utc>,
  ) -> Result<TokenClaims, TokenError> {
    let raw = TOKEN_ENGINE
      .decode(token.trim())
      .map_err(|_| TokenError::Malformed)?;
    if raw.len() <= SIGNATURE_LEN {
      return Err(TokenError::Malformed);
    }
    let (payload, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);

    let mut mac = self.mac.clone();
    mac.update(payload);
    mac.verify_slice(signature).map_err(|_| TokenError::BadSignature)?;

    let claims: TokenClaims =
      serde_json::from_slice(payload).map_err(|_| TokenError::Malformed)?;
    if now.timestamp() > claims.exp {
      return Err(TokenError::Expired);
    }
    Ok(claims)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn codec() -> TokenCodec { TokenCodec::new("test-secret").unwrap() }

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() }

  #[test]
  fn signed_claims_verify_unchanged() {
    let claims = TokenClaims {
      email:  "reader@example.com".into(),
      run_id: 42,
      link:   Some("https://example.com/a?b=c".into()),
      exp:    now().timestamp() + 60,
    };
    let token = codec().sign(&claims).unwrap();
    assert_eq!(codec().verify(&token, now()).unwrap(), claims);
  }

  #[test]
  fn purpose_survives_issue() {
    let c = codec();
    let open = c.issue("a@example.com", 1, TokenPurpose::Open, now()).unwrap();
    let click = c
      .issue("a@example.com", 1, TokenPurpose::Click("https://x.test/"), now())
      .unwrap();
    let unsub = c.issue("a@example.com", 1, TokenPurpose::Unsubscribe, now()).unwrap();

    assert_eq!(c.verify(&open, now()).unwrap().purpose(), TokenPurpose::Open);
    assert_eq!(
      c.verify(&click, now()).unwrap().purpose(),
      TokenPurpose::Click("https://x.test/")
    );
    assert_eq!(c.verify(&unsub, now()).unwrap().purpose(), TokenPurpose::Unsubscribe);
  }

  #[test]
  fn any_altered_byte_is_rejected() {
    let c = codec();
    let token = c.issue("a@example.com", 7, TokenPurpose::Open, now()).unwrap();
    let raw = TOKEN_ENGINE.decode(&token).unwrap();

    for i in 0..raw.len() {
      let mut tampered = raw.clone();
      tampered[i] ^= 0x01;
      let forged = TOKEN_ENGINE.encode(&tampered);
      assert!(c.verify(&forged, now()).is_err(), "byte {i} accepted");
    }
  }

  #[test]
  fn rejects_after_expiry() {
    let c = codec();
    let token = c.issue("a@example.com", 7, TokenPurpose::Open, now()).unwrap();

    let last_valid = now() + DEFAULT_VALIDITY;
    assert!(c.verify(&token, last_valid).is_ok());
    assert_eq!(
      c.verify(&token, last_valid + TimeDelta::seconds(1)),
      Err(TokenError::Expired)
    );
  }

  #[test]
  fn other_secret_is_rejected() {
    let token = codec().issue("a@example.com", 7, TokenPurpose::Open, now()).unwrap();
    let other = TokenCodec::new("another-secret").unwrap();
    assert_eq!(other.verify(&token, now()), Err(TokenError::BadSignature));
  }

  #[test]
  fn accepts_unpadded_and_rejects_garbage() {
    let c = codec();
    let token = c.issue("a@example.com", 7, TokenPurpose::Open, now()).unwrap();
    assert!(c.verify(token.trim_end_matches('='), now()).is_ok());
    assert_eq!(c.verify("not a token", now()), Err(TokenError::Malformed));
    assert_eq!(c.verify("", now()), Err(TokenError::Malformed));
  }

  #[test]
  fn empty_secret_is_refused() {
    assert!(matches!(TokenCodec::new(""), Err(Error::EmptySecret)));
  }
}
