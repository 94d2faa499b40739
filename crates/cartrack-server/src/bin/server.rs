//! cartrack server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the
//! configured store and serves the hook and checkout endpoints.
//!
//! The `auth_password_hash` setting is produced by:
//!
//! ```
//! cargo run -p cartrack-server --bin server -- hash-password
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use cartrack_core::{memory::MemoryStore, store::CartStore};
use cartrack_server::{
  ServerConfig,
  app::{app, app_state, hash_password},
  config::expand_tilde,
};
use cartrack_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "cartrack session and cart attribution server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Command {
  /// Serve HTTP (the default).
  Serve,
  /// Delete every stored session, cart, marketing parameter and order entry.
  Purge,
  /// Read a password on stdin and print its argon2 hash.
  HashPassword,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let command = cli.command.unwrap_or(Command::Serve);

  if command == Command::HashPassword {
    println!("{}", hash_password(&read_password()?)?);
    return Ok(());
  }

  let cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  if cfg.uses_memory_store() {
    tracing::warn!("using the in-memory store; nothing survives a restart");
    return run(MemoryStore::new(), &cfg, command).await;
  }

  let path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open store at {path:?}"))?;
  run(store, &cfg, command).await
}

async fn run<S>(store: S, cfg: &ServerConfig, command: Command) -> anyhow::Result<()>
where
  S: CartStore + Clone + 'static,
{
  if command == Command::Purge {
    store.purge().await.context("purge failed")?;
    tracing::info!("store purged");
    return Ok(());
  }

  let router = app(app_state(Arc::new(store), cfg)?);
  let address = format!("{}:{}", cfg.host, cfg.port);
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  tracing::info!("Listening on http://{address}");
  axum::serve(listener, router).await.context("server error")
}

/// One line from stdin, without its line terminator.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};

  eprint!("Password: ");
  io::stderr().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_owned())
}
