//! Bearer-token extractor.
//!
//! Callers send `Authorization: Bearer <project_id>.<api_key>`. The key is
//! checked against the argon2 PHC hashes configured for that project. The
//! extractor also charges the request to the project's rate-limit window, so
//! a handler that receives a [`Project`] has passed both checks.

use std::collections::HashMap;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use serde::Deserialize;
use stratum_core::{ProjectId, store::TenantStore};

use crate::{AppState, error::ApiError};

/// One `[[api_keys]]` entry in the server config.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
  pub project:  String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub key_hash: String,
}

/// Accepted key hashes, grouped by project.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
  keys: HashMap<ProjectId, Vec<String>>,
}

impl AuthConfig {
  /// Fails on an invalid project id or a hash that is not a PHC string.
  pub fn from_keys(entries: &[ApiKeyConfig]) -> stratum_core::Result<Self> {
    let mut keys: HashMap<ProjectId, Vec<String>> = HashMap::new();
    for entry in entries {
      let project = ProjectId::new(entry.project.clone())?;
      PasswordHash::new(&entry.key_hash).map_err(|e| {
        stratum_core::Error::Validation(format!("api key hash for {project}: {e}"))
      })?;
      keys.entry(project).or_default().push(entry.key_hash.clone());
    }
    Ok(Self { keys })
  }

  pub fn projects(&self) -> usize { self.keys.len() }

  /// Verify a raw bearer token and return the project it authorizes.
  pub fn verify_token(&self, token: &str) -> Result<ProjectId, ApiError> {
    // Project ids may contain dots; generated keys never do.
    let (project, key) = token.rsplit_once('.').ok_or(ApiError::Unauthorized)?;
    let project = ProjectId::new(project).map_err(|_| ApiError::Unauthorized)?;
    let hashes  = self.keys.get(&project).ok_or(ApiError::Unauthorized)?;

    let argon2 = Argon2::default();
    let accepted = hashes.iter().any(|hash| {
      PasswordHash::new(hash)
        .is_ok_and(|parsed| argon2.verify_password(key.as_bytes(), &parsed).is_ok())
    });
    if accepted { Ok(project) } else { Err(ApiError::Unauthorized) }
  }
}

/// Pull the bearer token out of the request headers.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
  headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .map(|t| t.trim().to_owned())
    .filter(|t| !t.is_empty())
    .ok_or(ApiError::Unauthorized)
}

/// The authenticated, rate-limited calling project.
#[derive(Debug, Clone)]
pub struct Project(pub ProjectId);

impl Project {
  /// A `project` field supplied in a query or body must name the caller.
  pub fn ensure(&self, claimed: Option<&str>) -> Result<(), ApiError> {
    match claimed {
      Some(claimed) if claimed != self.0.as_str() => Err(ApiError::Forbidden(format!(
        "not authorized for project {claimed:?}"
      ))),
      _ => Ok(()),
    }
  }
}

impl<S> FromRequestParts<AppState<S>> for Project
where
  S: TenantStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let token = bearer_token(&parts.headers)?;
    let auth  = state.auth.clone();
    // argon2 verification is CPU-bound; keep it off the reactor.
    let project = tokio::task::spawn_blocking(move || auth.verify_token(&token))
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))??;

    state
      .limiter
      .check(&project)
      .map_err(|retry_after| ApiError::RateLimited { retry_after })?;
    Ok(Project(project))
  }
}
