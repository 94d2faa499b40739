//! Session cookie middleware.
//!
//! Every request gets a [`SessionHandle`] built from its
//! `wordpress_bo_session` cookie, shared with handlers through request
//! extensions. If a handler caused a new token to be issued, the response
//! carries it back in `Set-Cookie`.

use std::sync::Arc;

use axum::{
  extract::{Request, State},
  http::{HeaderMap, HeaderValue, header},
  middleware::Next,
  response::Response,
};
use cartrack_core::{
  session::{SESSION_COOKIE_MAX_AGE, SESSION_COOKIE_NAME, SessionHandle},
  store::CartStore,
};
use uuid::Uuid;

use crate::AppState;

/// The request's session, as inserted by [`middleware`].
pub type CurrentSession<S> = Arc<SessionHandle<S>>;

pub async fn middleware<S>(
  State(state): State<AppState<S>>,
  mut request: Request,
  next: Next,
) -> Response
where
  S: CartStore + Clone + 'static,
{
  let cookie = session_cookie(request.headers());
  let session: CurrentSession<S> = Arc::new(state.engine.session(cookie.as_deref()));
  request.extensions_mut().insert(session.clone());

  let mut response = next.run(request).await;

  if let Some(token) = session.issued_token() {
    let value = set_cookie_value(token, state.site.cookie_domain.as_deref());
    match HeaderValue::from_str(&value) {
      Ok(value) => {
        response.headers_mut().append(header::SET_COOKIE, value);
      }
      Err(e) => tracing::warn!(error = %e, "could not encode session cookie"),
    }
  }
  response
}

/// The session cookie's value, if the request carries one.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
  headers
    .get_all(header::COOKIE)
    .iter()
    .filter_map(|value| value.to_str().ok())
    .flat_map(|value| value.split(';'))
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(name, _)| *name == SESSION_COOKIE_NAME)
    .map(|(_, value)| value.trim().to_owned())
}

pub fn set_cookie_value(token: Uuid, domain: Option<&str>) -> String {
  let mut value =
    format!("{SESSION_COOKIE_NAME}={token}; Path=/; Max-Age={SESSION_COOKIE_MAX_AGE}");
  if let Some(domain) = domain.filter(|d| !d.is_empty()) {
    value.push_str("; Domain=");
    value.push_str(domain);
  }
  value
}
