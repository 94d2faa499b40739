//! `POST /hooks`: platform events forwarded by the storefront.
//!
//! Failures inside the engine never reach the platform: they are logged and
//! the hook is acknowledged as if the update had been skipped.

use std::collections::BTreeMap;

use axum::{
  Extension, Json,
  extract::State,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use cartrack_core::{engine::Outcome, store::CartStore, trigger::Envelope};
use serde::Serialize;

use crate::{AppState, auth::Authenticated, session::CurrentSession};

/// Body of a `200` reply to an `order_received` hook.
#[derive(Debug, Serialize)]
pub struct OrderMetaReply {
  pub order_meta: BTreeMap<String, String>,
}

pub async fn handler<S>(
  State(state): State<AppState<S>>,
  _auth: Authenticated,
  Extension(session): Extension<CurrentSession<S>>,
  Json(envelope): Json<Envelope>,
) -> Response
where
  S: CartStore + Clone + 'static,
{
  let kind = envelope.trigger.kind();
  match state
    .engine
    .dispatch(&session, &envelope.requester, envelope.trigger)
    .await
  {
    Ok(Outcome::OrderMeta(order_meta)) => Json(OrderMetaReply { order_meta }).into_response(),
    Ok(outcome) => {
      tracing::debug!(kind, ?outcome, "hook handled");
      StatusCode::NO_CONTENT.into_response()
    }
    Err(e) => {
      tracing::warn!(kind, error = %e, "hook failed; update skipped");
      StatusCode::NO_CONTENT.into_response()
    }
  }
}
