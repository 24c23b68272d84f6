//! Namespace-pinned data access for sandboxed code.
//!
//! Every tenant statement is prepared with an SQLite authorizer installed.
//! The authorizer sees each table and column a statement touches and denies
//! anything outside the caller's registered tables, so pinning holds for
//! joins, subqueries and CTEs without parsing SQL ourselves.
//!
//! Tenant statements share the store's single connection, so each one also
//! runs under a progress handler. It interrupts the statement once the
//! store's statement timeout passes, or as soon as the future awaiting it is
//! dropped.

use std::{
  collections::BTreeSet,
  panic::RefUnwindSafe,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use rusqlite::{
  Connection, params_from_iter,
  hooks::{AuthAction, AuthContext, Authorization},
  types::Value as SqlValue,
};
use serde_json::{Map, Value, json};
use stratum_core::{ProjectId, ident::validate_sql_ident, table::PROJECT_COLUMN};

use crate::{
  Error, Result,
  encode::{json_to_sql, quote_ident, sql_to_json},
  store::SqliteStore,
};

/// Rows returned by a single tenant read.
pub const MAX_ROWS: usize = 1000;

/// VM instructions between progress-handler checks.
const PROGRESS_OPS: i32 = 1000;

// ─── Authorizer ──────────────────────────────────────────────────────────────

fn pinning_authorizer(
  owned: BTreeSet<String>,
) -> impl for<'r> FnMut(AuthContext<'r>) -> Authorization + Send + RefUnwindSafe + 'static {
  move |ctx: AuthContext<'_>| {
    if ctx.database_name.is_some_and(|db| db != "main") {
      return Authorization::Deny;
    }
    match ctx.action {
      AuthAction::Select | AuthAction::Function { .. } | AuthAction::Recursive => {
        Authorization::Allow
      }
      AuthAction::Update { column_name, .. } if column_name == PROJECT_COLUMN => {
        Authorization::Deny
      }
      AuthAction::Read { table_name, .. }
      | AuthAction::Insert { table_name }
      | AuthAction::Update { table_name, .. }
      | AuthAction::Delete { table_name }
        if owned.contains(table_name) =>
      {
        Authorization::Allow
      }
      _ => Authorization::Deny,
    }
  }
}

fn without_authorizer(conn: &Connection) {
  conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
}

// ─── Interruption ────────────────────────────────────────────────────────────

/// Set when the future awaiting a tenant statement is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
  fn drop(&mut self) { self.0.store(true, Ordering::Relaxed); }
}

/// When a running tenant statement must give up.
struct Limit {
  timeout:   Duration,
  cancelled: Arc<AtomicBool>,
}

impl Limit {
  /// The deadline is taken when the statement starts, not when it was queued.
  fn handler(self) -> impl FnMut() -> bool + Send + RefUnwindSafe + 'static {
    let deadline  = Instant::now().checked_add(self.timeout);
    let cancelled = self.cancelled;
    move || cancelled.load(Ordering::Relaxed) || deadline.is_some_and(|d| Instant::now() >= d)
  }
}

fn without_progress_handler(conn: &Connection) {
  conn.progress_handler(0, None::<fn() -> bool>);
}

/// Prepare and run `sql` with the pinning authorizer and `limit` in place.
fn run_pinned(
  conn: &Connection,
  owned: BTreeSet<String>,
  sql: &str,
  params: Vec<SqlValue>,
  limit: Limit,
) -> rusqlite::Result<Value> {
  conn.authorizer(Some(pinning_authorizer(owned)));
  conn.progress_handler(PROGRESS_OPS, Some(limit.handler()));
  let result = run_statement(conn, sql, params);
  without_progress_handler(conn);
  without_authorizer(conn);
  result
}

fn run_statement(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> rusqlite::Result<Value> {
  let mut stmt = conn.prepare(sql)?;

  if stmt.column_count() == 0 {
    let changes = stmt.execute(params_from_iter(params))?;
    return Ok(json!({ "changes": changes }));
  }

  let names: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
  let mut rows = stmt.query(params_from_iter(params))?;
  let mut out = Vec::new();
  while let Some(row) = rows.next()? {
    if out.len() == MAX_ROWS {
      break;
    }
    let mut obj = Map::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
      obj.insert(name.clone(), sql_to_json(row.get_ref(i)?));
    }
    out.push(Value::Object(obj));
  }
  Ok(Value::Array(out))
}

// ─── Operations ──────────────────────────────────────────────────────────────

impl SqliteStore {
  /// The caller's tables, after checking that `table` is one of them.
  async fn owned_including(&self, project: &ProjectId, table: &str) -> Result<BTreeSet<String>> {
    validate_sql_ident("table name", table)?;
    let owned = self.registered_tables(project).await?;
    if !owned.contains(table) {
      return Err(Error::PermissionDenied(format!(
        "table {table:?} does not belong to this project"
      )));
    }
    Ok(owned)
  }

  /// Run `sql` pinned to `owned` on the store's connection, then hand the
  /// result to `finish` while still on that connection.
  async fn call_pinned<T, F>(
    &self,
    owned: BTreeSet<String>,
    sql: String,
    params: Vec<SqlValue>,
    finish: F,
  ) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection, Value) -> T + Send + 'static,
  {
    let cancelled = Arc::new(AtomicBool::new(false));
    let _guard    = CancelOnDrop(cancelled.clone());
    let limit     = Limit { timeout: self.statement_timeout, cancelled };

    let out = self
      .conn
      .call(move |conn| {
        let value = run_pinned(conn, owned, &sql, params, limit)?;
        Ok(finish(conn, value))
      })
      .await?;
    Ok(out)
  }

  pub(crate) async fn pinned_query(
    &self,
    project: &ProjectId,
    sql: String,
    params: Vec<Value>,
  ) -> Result<Value> {
    let owned  = self.registered_tables(project).await?;
    let params: Vec<SqlValue> = params.iter().map(json_to_sql).collect();

    self.call_pinned(owned, sql, params, |_, value| value).await
  }

  pub(crate) async fn pinned_insert(
    &self,
    project: &ProjectId,
    table: String,
    mut row: Map<String, Value>,
  ) -> Result<i64> {
    let owned = self.owned_including(project, &table).await?;
    row.remove(PROJECT_COLUMN);
    for column in row.keys() {
      validate_sql_ident("column name", column)?;
    }

    let mut columns = vec![quote_ident(PROJECT_COLUMN)];
    let mut params  = vec![SqlValue::Text(project.as_str().to_owned())];
    for (column, value) in &row {
      columns.push(quote_ident(column));
      params.push(json_to_sql(value));
    }
    let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
      "INSERT INTO {} ({}) VALUES ({})",
      quote_ident(&table),
      columns.join(", "),
      placeholders.join(", ")
    );

    self
      .call_pinned(owned, sql, params, |conn, _| conn.last_insert_rowid())
      .await
  }

  pub(crate) async fn pinned_select(
    &self,
    project: &ProjectId,
    table: String,
    filter: Map<String, Value>,
  ) -> Result<Vec<Value>> {
    let owned = self.owned_including(project, &table).await?;

    let mut clauses = vec![format!("{} = ?1", quote_ident(PROJECT_COLUMN))];
    let mut params  = vec![SqlValue::Text(project.as_str().to_owned())];
    for (column, value) in &filter {
      if column == PROJECT_COLUMN {
        continue;
      }
      validate_sql_ident("column name", column)?;
      params.push(json_to_sql(value));
      clauses.push(format!("{} IS ?{}", quote_ident(column), params.len()));
    }
    let sql = format!(
      "SELECT * FROM {} WHERE {} ORDER BY \"id\" LIMIT {MAX_ROWS}",
      quote_ident(&table),
      clauses.join(" AND ")
    );

    let value = self.call_pinned(owned, sql, params, |_, value| value).await?;
    match value {
      Value::Array(rows) => Ok(rows),
      _ => Ok(Vec::new()),
    }
  }
}
