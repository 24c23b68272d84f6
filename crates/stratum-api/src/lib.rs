//! JSON REST API for Stratum.
//!
//! Exposes an axum [`Router`] backed by any [`TenantStore`] plus a
//! [`Runtime`] over the same store. Every route except `/health` requires a
//! bearer token naming the calling project; see [`auth`].
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = stratum_api::api_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod auth;
pub mod error;
pub mod functions;
pub mod rate_limit;
pub mod secrets;
pub mod tables;

use std::sync::Arc;

use axum::{
  Json, Router,
  routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stratum_core::store::TenantStore;
use stratum_runtime::Runtime;
use tower_http::trace::TraceLayer;

pub use auth::{ApiKeyConfig, AuthConfig, Project};
pub use error::ApiError;
pub use rate_limit::{RateLimitConfig, RateLimiter};

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub store:   Arc<S>,
  pub runtime: Runtime<S>,
  pub auth:    Arc<AuthConfig>,
  pub limiter: RateLimiter,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:   self.store.clone(),
      runtime: self.runtime.clone(),
      auth:    self.auth.clone(),
      limiter: self.limiter.clone(),
    }
  }
}

// ─── Shared request shapes ────────────────────────────────────────────────────

/// `?project=<id>` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
  pub project: Option<String>,
}

/// `{"success": true, ...}` wrapper for mutation responses.
#[derive(Debug, Serialize)]
pub struct Success<T> {
  pub success: bool,
  #[serde(flatten)]
  pub body:    T,
}

impl<T> Success<T> {
  pub fn new(body: T) -> Self { Self { success: true, body } }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: TenantStore + 'static,
{
  Router::new()
    // Secrets
    .route(
      "/secrets",
      get(secrets::list::<S>)
        .post(secrets::create::<S>)
        .delete(secrets::remove::<S>),
    )
    // Tables
    .route("/tables", get(tables::list::<S>).post(tables::create::<S>))
    // Functions
    .route("/functions", get(functions::list::<S>).post(functions::deploy::<S>))
    .route("/functions/{slug}", delete(functions::remove::<S>))
    .route("/functions/{slug}/invoke", post(functions::invoke::<S>))
    .route("/health", get(health))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// `GET /health` — no auth.
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

#[cfg(test)]
mod tests;
