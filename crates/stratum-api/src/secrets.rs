//! Handlers for `/secrets` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/secrets` | Metadata plus a digest of each value, never the value |
//! | `POST`   | `/secrets` | Body: `{"name":"API_KEY","value":"...","description":"..."}` |
//! | `DELETE` | `/secrets` | Body: `{"id":"<uuid>"}`; 404 if absent |

use axum::{
  Json,
  extract::{Query, State},
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use stratum_core::{
  secret::{NewSecret, SecretSummary},
  store::TenantStore,
};
use uuid::Uuid;

use crate::{AppState, ProjectQuery, auth::Project, error::ApiError};

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /secrets[?project=<id>]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Query(query): Query<ProjectQuery>,
) -> Result<Json<Vec<SecretSummary>>, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(query.project.as_deref())?;
  let secrets = state.store.list_secrets(&caller.0).await.map_err(ApiError::store)?;
  Ok(Json(secrets))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateBody {
  pub project:     Option<String>,
  pub name:        String,
  pub value:       String,
  pub description: Option<String>,
}

/// `POST /secrets` — upserts by name.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(body.project.as_deref())?;
  let mut secret = NewSecret::new(body.name, body.value);
  secret.description = body.description;

  let stored = state.store.put_secret(&caller.0, secret).await.map_err(ApiError::store)?;
  tracing::info!(project = %caller.0, name = %stored.name, "secret stored");
  Ok(Json(json!({ "success": true })))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeleteBody {
  pub project: Option<String>,
  pub id:      Uuid,
}

/// `DELETE /secrets` — body: `{"id":"<uuid>"}`
pub async fn remove<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Json(body): Json<DeleteBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(body.project.as_deref())?;
  let removed = state
    .store
    .delete_secret(&caller.0, body.id)
    .await
    .map_err(ApiError::store)?;
  if !removed {
    return Err(ApiError::NotFound(format!("secret {} not found", body.id)));
  }
  Ok(Json(json!({ "success": true })))
}
