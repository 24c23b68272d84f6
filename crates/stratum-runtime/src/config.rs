//! Runtime limits. Deserialised from the `[runtime]` config section.

use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  /// Wall-clock budget for one invocation, secret decryption included.
  pub timeout_ms:     u64,
  /// Upper bound applied to every `setTimeout` / `sleep` delay.
  pub max_timer_ms:   u64,
  /// V8 heap ceiling per isolate.
  pub heap_limit_mb:  usize,
  /// Isolates allowed to run at the same time.
  pub max_concurrent: usize,
  /// Log lines kept per invocation; the rest are dropped.
  pub max_log_lines:  usize,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      timeout_ms:     2000,
      max_timer_ms:   1000,
      heap_limit_mb:  64,
      max_concurrent: 16,
      max_log_lines:  1000,
    }
  }
}

impl RuntimeConfig {
  pub fn validate(&self) -> Result<()> {
    if self.timeout_ms == 0 {
      return Err(Error::Config("timeout_ms must be positive".into()));
    }
    if self.max_concurrent == 0 {
      return Err(Error::Config("max_concurrent must be positive".into()));
    }
    if self.heap_limit_mb < 8 {
      return Err(Error::Config("heap_limit_mb must be at least 8".into()));
    }
    Ok(())
  }
}
