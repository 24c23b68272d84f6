//! Stratum server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus `STRATUM_*`
//! environment overrides, opens the SQLite store, reconciles the table
//! registry, and serves the JSON API over HTTP until SIGINT/SIGTERM.
//!
//! # API key hash generation
//!
//! To generate the argon2 PHC string for an `[[api_keys]]` entry:
//!
//! ```text
//! cargo run -p stratum-server -- --hash-key
//! ```

mod settings;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use stratum_api::{AppState, AuthConfig, RateLimiter, api_router};
use stratum_core::store::TenantStore;
use stratum_runtime::Runtime;
use stratum_store_sqlite::SqliteStore;
use stratum_vault::Vault;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Stratum multi-tenant backend server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for an API key entered on stdin and exit.
  #[arg(long)]
  hash_key: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash an API key and exit.
  if cli.hash_key {
    let key = read_key()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(key.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let mut cfg = ServerConfig::load(&cli.config)?;
  let store_path = expand_tilde(&cfg.store_path);

  let secret = std::mem::take(&mut cfg.vault.service_secret);
  let vault = Vault::new(secret.as_bytes(), cfg.vault.kdf)
    .context("invalid [vault] configuration (is STRATUM_VAULT__SERVICE_SECRET set?)")?;

  let store = SqliteStore::open(&store_path, vault)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?
    // No tenant statement outlives the invocation that issued it.
    .with_statement_timeout(Duration::from_millis(cfg.runtime.timeout_ms));
  let store = Arc::new(store);

  let report = store
    .reconcile_registry()
    .await
    .context("failed to reconcile table registry")?;
  tracing::info!(
    removed_stale = report.removed_stale.len(),
    unregistered = report.unregistered.len(),
    "table registry reconciled"
  );

  let runtime = Runtime::new(store.clone(), cfg.runtime.clone())
    .context("invalid [runtime] configuration")?;
  let auth = AuthConfig::from_keys(&cfg.api_keys).context("invalid [[api_keys]] entry")?;
  if auth.projects() == 0 {
    tracing::warn!("no api keys configured; every authenticated route will answer 401");
  }

  let limiter = RateLimiter::new(cfg.rate_limit.clone());
  limiter.start_sweeper();

  let app = api_router(AppState {
    store,
    runtime,
    auth: Arc::new(auth),
    limiter: limiter.clone(),
  });

  let address = cfg.address();
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;
  tracing::info!("Listening on http://{address}");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  limiter.stop_sweeper();
  tracing::info!("shutdown complete");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "failed to listen for ctrl-c");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        tracing::error!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  tracing::info!("shutdown signal received, draining connections");
}

/// Read an API key from stdin.
fn read_key() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("API key: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  let key = line.trim_end_matches(['\n', '\r']).to_string();
  anyhow::ensure!(!key.is_empty(), "empty key");
  anyhow::ensure!(!key.contains('.'), "keys must not contain '.'");
  Ok(key)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
