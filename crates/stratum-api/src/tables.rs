//! Handlers for `/tables` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/tables` | Tables the caller owns (or has rows in, for legacy tables) |
//! | `POST` | `/tables` | Body: `{"tableName":"notes","columns":[{"name":"body","type":"text"}]}` |

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use stratum_core::{
  store::TenantStore,
  table::{CreateTable, TableSummary},
};

use crate::{AppState, ProjectQuery, Success, auth::Project, error::ApiError};

/// `GET /tables[?project=<id>]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Query(query): Query<ProjectQuery>,
) -> Result<Json<Vec<TableSummary>>, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(query.project.as_deref())?;
  let tables = state.store.list_tables(&caller.0).await.map_err(ApiError::store)?;
  Ok(Json(tables))
}

#[derive(Deserialize)]
pub struct CreateBody {
  pub project: Option<String>,
  #[serde(flatten)]
  pub table:   CreateTable,
}

/// `POST /tables` — unknown column types are coerced to text and reported
/// back in `coercedColumns`; reserved column names land in `droppedColumns`.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  caller: Project,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: TenantStore + 'static,
{
  caller.ensure(body.project.as_deref())?;
  let created = state
    .store
    .create_table(&caller.0, body.table)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(Success::new(created))))
}
