//! Wiring between configuration, store, publisher and router.

use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::Router;
use cartrack_api::{AppState, SiteConfig, auth::AuthConfig};
use cartrack_core::{engine::Engine, publish::Publisher, store::CartStore};
use rand_core::OsRng;
use tower_http::trace::TraceLayer;

use crate::{ServerConfig, webhook::WebhookListener};

/// Application state for `store`, publishing to the configured webhooks.
pub fn app_state<S>(store: Arc<S>, cfg: &ServerConfig) -> anyhow::Result<AppState<S>>
where
  S: CartStore + Clone + 'static,
{
  let publisher = Publisher::new().with_listener(WebhookListener::new(cfg.webhooks.clone())?);
  tracing::info!(targets = cfg.webhooks.len(), "webhook delivery configured");

  Ok(AppState {
    engine: Engine::new(store, publisher),
    auth:   Arc::new(AuthConfig {
      username:      cfg.auth_username.clone(),
      password_hash: cfg.auth_password_hash.clone(),
    }),
    site:   Arc::new(SiteConfig {
      cookie_domain: cfg.cookie_domain.clone(),
      nonce_secret:  cfg.nonce_secret.clone(),
    }),
  })
}

/// The API router with request tracing.
pub fn app<S>(state: AppState<S>) -> Router
where
  S: CartStore + Clone + 'static,
{
  cartrack_api::router(state).layer(TraceLayer::new_for_http())
}

/// Argon2 PHC string for `auth_password_hash`.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|hash| hash.to_string())
    .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))
}
