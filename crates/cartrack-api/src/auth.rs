//! HTTP Basic auth for the hook endpoint.
//!
//! The platform forwards hooks with a fixed username and a password whose
//! argon2 hash is configured on the server.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use cartrack_core::store::CartStore;

use crate::{AppState, error::ApiError};

/// Credentials the platform must present when forwarding hooks.
#[derive(Clone)]
pub struct AuthConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

impl AuthConfig {
  /// Accept the request only if its `Authorization` header carries these
  /// credentials.
  pub fn check(&self, headers: &HeaderMap) -> Result<(), ApiError> {
    let (username, password) = basic_credentials(headers).ok_or(ApiError::Unauthorized)?;
    if username != self.username {
      return Err(ApiError::Unauthorized);
    }

    let hash = PasswordHash::new(&self.password_hash).map_err(|e| {
      tracing::warn!(error = %e, "configured password hash is not a PHC string");
      ApiError::Unauthorized
    })?;
    Argon2::default()
      .verify_password(password.as_bytes(), &hash)
      .map_err(|_| ApiError::Unauthorized)
  }
}

/// `(username, password)` from a `Basic` authorization header.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
  let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
  let (scheme, encoded) = value.split_once(' ')?;
  if !scheme.eq_ignore_ascii_case("basic") {
    return None;
  }

  let decoded = String::from_utf8(B64.decode(encoded.trim()).ok()?).ok()?;
  let (username, password) = decoded.split_once(':')?;
  Some((username.to_owned(), password.to_owned()))
}

/// Marker extractor: a handler taking it only runs for authenticated hooks.
pub struct Authenticated;

impl<S> FromRequestParts<AppState<S>> for Authenticated
where
  S: CartStore + Clone + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    state.auth.check(&parts.headers)?;
    Ok(Authenticated)
  }
}
