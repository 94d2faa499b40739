//! Runtime server configuration.
//!
//! Read from `config.toml` layered with `CARTRACK_*` environment variables.

use std::path::{Path, PathBuf};

use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;

use crate::webhook::WebhookTarget;

/// `store_path` value selecting the non-persistent in-memory store.
pub const MEMORY_STORE: &str = ":memory:";

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  pub store_path:         PathBuf,
  /// `Domain` attribute of the session cookie.
  #[serde(default)]
  pub cookie_domain:      Option<String>,
  pub nonce_secret:       String,
  pub auth_username:      String,
  pub auth_password_hash: String,
  #[serde(default)]
  pub webhooks:           Vec<WebhookTarget>,
}

impl ServerConfig {
  /// Load from `path` (optional) and the environment.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    defaults()?
      .add_source(File::from(path).required(false))
      .add_source(Environment::with_prefix("CARTRACK"))
      .build()?
      .try_deserialize()
  }

  /// Load from TOML text alone.
  pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
    defaults()?
      .add_source(File::from_str(text, FileFormat::Toml))
      .build()?
      .try_deserialize()
  }

  pub fn uses_memory_store(&self) -> bool { self.store_path.as_os_str() == MEMORY_STORE }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
  Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 8080)?
    .set_default("store_path", "~/.local/share/cartrack/cartrack.db")
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
