//! Browser-facing endpoints used by the checkout script: `GET /nonce` hands
//! out the per-session anti-forgery token, `POST /capture-email` reports the
//! email typed into the checkout form.
//!
//! Nothing a browser sends here is trusted beyond the email itself: the cart
//! that gets republished is the one already stored for the session.

use axum::{
  Extension, Form, Json,
  extract::{FromRequest, Request, State},
  http::{StatusCode, header},
  response::{IntoResponse, Response},
};
use cartrack_core::store::CartStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{AppState, error::ApiError, session::CurrentSession};

/// The anti-forgery token for `session_id`: hex SHA-256 over the configured
/// secret and the session token.
pub fn nonce(secret: &str, session_id: Uuid) -> String {
  let mut hasher = Sha256::new();
  hasher.update(secret.as_bytes());
  hasher.update(b":");
  hasher.update(session_id.as_bytes());
  hex::encode(hasher.finalize())
}

/// Whether `presented` is the nonce of `session_id`, compared in constant
/// time.
pub fn nonce_matches(secret: &str, session_id: Uuid, presented: &str) -> bool {
  let expected = nonce(secret, session_id);
  bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

// ─── GET /nonce ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct NonceReply {
  pub ajax_url: String,
  pub nonce:    String,
}

pub async fn issue_nonce<S>(
  State(state): State<AppState<S>>,
  Extension(session): Extension<CurrentSession<S>>,
) -> Result<Json<NonceReply>, ApiError>
where
  S: CartStore + Clone + 'static,
{
  let session_id = session.session_id().await?;
  Ok(Json(NonceReply {
    ajax_url: "/capture-email".to_owned(),
    nonce:    nonce(&state.site.nonce_secret, session_id),
  }))
}

// ─── POST /capture-email ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
  pub email: String,
  /// Checkout scripts post the field as `_ajax_nonce`.
  #[serde(alias = "_ajax_nonce")]
  pub nonce: String,
}

/// A [`CaptureRequest`] from either a JSON or a urlencoded form body.
pub struct CaptureBody(pub CaptureRequest);

impl<St> FromRequest<St> for CaptureBody
where
  St: Send + Sync,
{
  type Rejection = Response;

  async fn from_request(req: Request, state: &St) -> Result<Self, Self::Rejection> {
    let is_json = req
      .headers()
      .get(header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
      let Json(body) = Json::<CaptureRequest>::from_request(req, state)
        .await
        .map_err(IntoResponse::into_response)?;
      Ok(Self(body))
    } else {
      let Form(body) = Form::<CaptureRequest>::from_request(req, state)
        .await
        .map_err(IntoResponse::into_response)?;
      Ok(Self(body))
    }
  }
}

pub async fn capture_email<S>(
  State(state): State<AppState<S>>,
  Extension(session): Extension<CurrentSession<S>>,
  CaptureBody(body): CaptureBody,
) -> Result<StatusCode, ApiError>
where
  S: CartStore + Clone + 'static,
{
  let session_id = session.session_id().await?;
  if !nonce_matches(&state.site.nonce_secret, session_id, &body.nonce) {
    return Err(ApiError::InvalidNonce);
  }

  if let Err(e) = state
    .engine
    .capture_browser_email(&session, &body.email)
    .await
  {
    tracing::warn!(%session_id, error = %e, "checkout email capture failed; update skipped");
  }
  Ok(StatusCode::NO_CONTENT)
}
