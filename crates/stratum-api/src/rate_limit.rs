//! Per-project fixed-window request limiter.
//!
//! Counters live in this process only. Every server instance keeps its own,
//! so behind a load balancer the effective limit is multiplied by the number
//! of instances. Good enough to blunt a runaway client; not a quota.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, Weak},
  time::{Duration, Instant},
};

use serde::Deserialize;
use stratum_core::ProjectId;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// Deserialised from the `[rate_limit]` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  pub enabled:             bool,
  /// Requests admitted per project per window.
  pub limit:               u32,
  pub window_secs:         u64,
  /// How often expired windows are dropped from memory.
  pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      enabled:             true,
      limit:               120,
      window_secs:         60,
      sweep_interval_secs: 60,
    }
  }
}

struct Window {
  started: Instant,
  count:   u32,
}

struct Inner {
  config:  RateLimitConfig,
  windows: Mutex<HashMap<ProjectId, Window>>,
  sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct RateLimiter {
  inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RateLimiter {
  pub fn new(config: RateLimitConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        config,
        windows: Mutex::new(HashMap::new()),
        sweeper: Mutex::new(None),
      }),
    }
  }

  fn window(&self) -> Duration { Duration::from_secs(self.inner.config.window_secs.max(1)) }

  /// Count one request for `project`. On refusal, returns how long until the
  /// current window closes.
  pub fn check(&self, project: &ProjectId) -> Result<(), Duration> {
    self.check_at(project, Instant::now())
  }

  fn check_at(&self, project: &ProjectId, now: Instant) -> Result<(), Duration> {
    if !self.inner.config.enabled {
      return Ok(());
    }
    let span = self.window();
    let mut windows = lock(&self.inner.windows);
    let window = windows
      .entry(project.clone())
      .or_insert(Window { started: now, count: 0 });

    let age = now.saturating_duration_since(window.started);
    if age >= span {
      *window = Window { started: now, count: 0 };
    }
    if window.count >= self.inner.config.limit {
      return Err(span.saturating_sub(now.saturating_duration_since(window.started)));
    }
    window.count += 1;
    Ok(())
  }

  /// Drop every window that has expired. Returns how many were removed.
  pub fn sweep(&self) -> usize { self.sweep_at(Instant::now()) }

  fn sweep_at(&self, now: Instant) -> usize {
    let span = self.window();
    let mut windows = lock(&self.inner.windows);
    let before = windows.len();
    windows.retain(|_, w| now.saturating_duration_since(w.started) < span);
    before - windows.len()
  }

  /// Projects currently holding a window.
  pub fn tracked(&self) -> usize { lock(&self.inner.windows).len() }

  /// Spawn the periodic sweep on the current tokio runtime. Calling it while
  /// a sweeper is already running does nothing.
  pub fn start_sweeper(&self) {
    let mut slot = lock(&self.inner.sweeper);
    if slot.as_ref().is_some_and(|h| !h.is_finished()) {
      return;
    }

    let every = Duration::from_secs(self.inner.config.sweep_interval_secs.max(1));
    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    *slot = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        let removed = RateLimiter { inner }.sweep();
        if removed > 0 {
          tracing::debug!(removed, "swept expired rate-limit windows");
        }
      }
    }));
    tracing::info!(interval_secs = every.as_secs(), "rate-limit sweeper started");
  }

  /// Stop the sweeper if it is running.
  pub fn stop_sweeper(&self) {
    if let Some(handle) = lock(&self.inner.sweeper).take() {
      handle.abort();
      tracing::info!("rate-limit sweeper stopped");
    }
  }

  pub fn sweeper_running(&self) -> bool {
    lock(&self.inner.sweeper).as_ref().is_some_and(|h| !h.is_finished())
  }
}
