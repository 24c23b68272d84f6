//! Handlers for `/functions` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/functions` | Functions with their files |
//! | `POST`   | `/functions` | Deploy or redeploy; id and slug survive redeploys |
//! | `DELETE` | `/functions/{slug}` | 404 if not found |
//! | `POST`   | `/functions/{slug}/invoke` | Body: `{"payload":...,"headers":{},"method":"POST"}` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use stratum_core::{
  function::{DeployFunction, FunctionWithFiles},
  invocation::{ErrorKind, Invocation, InvocationOutcome},
  store::TenantStore,
};

use crate::{AppState, ProjectQuery, auth::Project, error::ApiError};

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /functions[?project=<id>]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Query(query): Query<ProjectQuery>,
) -> Result<Json<Vec<FunctionWithFiles>>, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(query.project.as_deref())?;
  let functions = state.store.list_functions(&caller.0).await.map_err(ApiError::store)?;
  Ok(Json(functions))
}

// ─── Deploy ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DeployBody {
  pub project:  Option<String>,
  #[serde(flatten)]
  pub function: DeployFunction,
}

/// `POST /functions`
pub async fn deploy<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Json(body): Json<DeployBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(body.project.as_deref())?;
  let deployed = state
    .store
    .deploy_function(&caller.0, body.function)
    .await
    .map_err(ApiError::store)?;
  tracing::info!(
    project = %caller.0,
    slug = %deployed.function.slug,
    files = deployed.files.len(),
    "function deployed"
  );
  Ok((StatusCode::CREATED, Json(deployed)))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /functions/{slug}[?project=<id>]`
pub async fn remove<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Path(slug): Path<String>,
  Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(query.project.as_deref())?;
  let removed = state
    .store
    .delete_function(&caller.0, &slug)
    .await
    .map_err(ApiError::store)?;
  if !removed {
    return Err(ApiError::NotFound(format!("function {slug:?} not found")));
  }
  Ok(Json(json!({ "success": true })))
}

// ─── Invoke ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct InvokeBody {
  pub project:    Option<String>,
  #[serde(flatten)]
  pub invocation: Invocation,
}

/// `POST /functions/{slug}/invoke`
///
/// Success is `200 {result, logs, executionTimeMs}`. Failure keeps the same
/// logs and timing and reports `{error, details}` under a status that mirrors
/// the error kind.
pub async fn invoke<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Path(slug): Path<String>,
  Json(body): Json<InvokeBody>,
) -> Result<Response, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(body.project.as_deref())?;
  let outcome = state.runtime.invoke(&caller.0, &slug, body.invocation).await;
  Ok(outcome_response(outcome))
}

fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
    ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
    ErrorKind::ExecutionError | ErrorKind::LoadFailure | ErrorKind::Internal => {
      StatusCode::INTERNAL_SERVER_ERROR
    }
  }
}

fn outcome_response(outcome: InvocationOutcome) -> Response {
  match outcome {
    InvocationOutcome::Success { .. } => (StatusCode::OK, Json(outcome)).into_response(),
    InvocationOutcome::Failure { error, logs, execution_time_ms } => {
      let body = json!({
        "error": error.message,
        "details": error.kind,
        "logs": logs,
        "executionTimeMs": execution_time_ms,
      });
      (status_for(error.kind), Json(body)).into_response()
    }
  }
}
