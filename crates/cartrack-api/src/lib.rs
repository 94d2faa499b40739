//! HTTP surface of the cartrack engine.
//!
//! Exposes an axum [`Router`] backed by any [`CartStore`]: the authenticated
//! hook endpoint the storefront forwards platform events to, and the two
//! browser-facing endpoints used by the checkout script. Every route runs
//! behind the session cookie middleware.

pub mod auth;
pub mod capture;
pub mod error;
pub mod hooks;
pub mod session;

pub use error::ApiError;

use std::sync::Arc;

use axum::{
  Json, Router,
  routing::{get, post},
};
use cartrack_core::{engine::Engine, store::CartStore};
use serde_json::{Value, json};

use auth::AuthConfig;

// ─── Application state ───────────────────────────────────────────────────────

/// Storefront-facing settings.
#[derive(Clone, Debug, Default)]
pub struct SiteConfig {
  /// `Domain` attribute of the session cookie; omitted when `None`.
  pub cookie_domain: Option<String>,
  /// Secret mixed into the per-session anti-forgery token.
  pub nonce_secret:  String,
}

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState<S: CartStore> {
  pub engine: Engine<S>,
  pub auth:   Arc<AuthConfig>,
  pub site:   Arc<SiteConfig>,
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the application router for `state`.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: CartStore + Clone + 'static,
{
  Router::new()
    .route("/hooks", post(hooks::handler::<S>))
    .route("/nonce", get(capture::issue_nonce::<S>))
    .route("/capture-email", post(capture::capture_email::<S>))
    .route("/version", get(version))
    .layer(axum::middleware::from_fn_with_state(
      state.clone(),
      session::middleware::<S>,
    ))
    .with_state(state)
}

async fn version() -> Json<Value> { Json(json!({ "version": env!("CARGO_PKG_VERSION") })) }
