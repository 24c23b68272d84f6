//! Server configuration: `config.toml` overlaid with `STRATUM_*` environment
//! variables. Nested keys use `__`, e.g. `STRATUM_VAULT__SERVICE_SECRET`.

use std::{fmt, path::{Path, PathBuf}};

use anyhow::Context as _;
use serde::Deserialize;
use stratum_api::{ApiKeyConfig, RateLimitConfig};
use stratum_runtime::RuntimeConfig;
use stratum_vault::KdfParams;
use zeroize::Zeroizing;

#[derive(Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub vault:      VaultConfig,
  pub runtime:    RuntimeConfig,
  pub rate_limit: RateLimitConfig,
  pub api_keys:   Vec<ApiKeyConfig>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".to_string(),
      port:       8787,
      store_path: PathBuf::from("stratum.db"),
      vault:      VaultConfig::default(),
      runtime:    RuntimeConfig::default(),
      rate_limit: RateLimitConfig::default(),
      api_keys:   Vec::new(),
    }
  }
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
  /// Root of every project key. Supply it through the environment.
  pub service_secret: Zeroizing<String>,
  pub kdf:            KdfParams,
}

impl fmt::Debug for VaultConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("VaultConfig")
      .field("service_secret", &"<redacted>")
      .field("kdf", &self.kdf)
      .finish()
  }
}

impl ServerConfig {
  /// Read `path` (optional) and the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("STRATUM")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read configuration")?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

#[cfg(test)]
mod tests {
  use config::FileFormat;

  use super::*;

  fn parse(toml: &str) -> ServerConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn defaults_fill_missing_sections() {
    let cfg = parse("port = 9000");
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.runtime.timeout_ms, 2000);
    assert_eq!(cfg.rate_limit.limit, 120);
    assert!(cfg.vault.service_secret.is_empty());
    assert!(cfg.api_keys.is_empty());
  }

  #[test]
  fn nested_sections_and_keys() {
    let cfg = parse(
      r#"
        store_path = "/var/lib/stratum/data.db"

        [vault]
        service_secret = "s3cret"
        kdf = { memory_kib = 4096, iterations = 3, lanes = 1 }

        [runtime]
        timeout_ms = 500

        [rate_limit]
        enabled = false

        [[api_keys]]
        project = "acme"
        key_hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2g"
      "#,
    );
    assert_eq!(cfg.store_path, PathBuf::from("/var/lib/stratum/data.db"));
    assert_eq!(cfg.vault.service_secret.as_str(), "s3cret");
    assert_eq!(cfg.vault.kdf.memory_kib, 4096);
    assert_eq!(cfg.runtime.timeout_ms, 500);
    assert_eq!(cfg.runtime.max_timer_ms, 1000);
    assert!(!cfg.rate_limit.enabled);
    assert_eq!(cfg.api_keys[0].project, "acme");
    assert!(!format!("{:?}", cfg.vault).contains("s3cret"));
  }
}
