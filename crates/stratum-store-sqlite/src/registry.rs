//! Dynamic tenant tables and the ownership registry.
//!
//! Table names form one flat namespace shared by every project. The registry
//! maps each name to exactly one owner; physical DDL and the registry write
//! commit together, and anything that drifts apart anyway is healed on read.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _};
use stratum_core::{
  ProjectId,
  table::{
    ColumnType, CreateTable, PROJECT_COLUMN, PROJECT_INDEX_SUFFIX, PlannedColumn, ReconcileReport,
    TableCreated, TablePlan, TableSummary,
  },
};

use crate::{
  Result,
  encode::{encode_dt, quote_ident, sql_literal},
  schema::SYSTEM_TABLES,
  store::SqliteStore,
};

const NOW_DEFAULT: &str = "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))";

// ─── DDL rendering ───────────────────────────────────────────────────────────

fn sql_type(ty: ColumnType) -> &'static str {
  match ty {
    ColumnType::Integer | ColumnType::Boolean => "INTEGER",
    ColumnType::Real => "REAL",
    ColumnType::Numeric => "NUMERIC",
    ColumnType::Blob => "BLOB",
    ColumnType::Text
    | ColumnType::Json
    | ColumnType::Date
    | ColumnType::Timestamp
    | ColumnType::Time
    | ColumnType::Uuid => "TEXT",
  }
}

fn render_column(col: &PlannedColumn) -> String {
  let name = quote_ident(&col.name);
  let mut out = format!("{name} {}", sql_type(col.column_type));
  if col.not_null {
    out.push_str(" NOT NULL");
  }
  if col.unique {
    out.push_str(" UNIQUE");
  }
  if let Some(default) = &col.default {
    out.push_str(" DEFAULT ");
    out.push_str(&sql_literal(default));
  }
  match col.column_type {
    ColumnType::Json => out.push_str(&format!(" CHECK ({name} IS NULL OR json_valid({name}))")),
    ColumnType::Boolean => out.push_str(&format!(" CHECK ({name} IS NULL OR {name} IN (0, 1))")),
    _ => {}
  }
  out
}

/// Render the `CREATE TABLE` and project index statements for `plan`.
pub(crate) fn render_ddl(plan: &TablePlan) -> String {
  let table = quote_ident(&plan.table_name);
  let mut columns = vec![
    "\"id\" INTEGER PRIMARY KEY".to_owned(),
    format!("{} TEXT NOT NULL", quote_ident(PROJECT_COLUMN)),
    format!("\"created_at\" TEXT NOT NULL DEFAULT {NOW_DEFAULT}"),
    format!("\"updated_at\" TEXT NOT NULL DEFAULT {NOW_DEFAULT}"),
  ];
  columns.extend(plan.columns.iter().map(render_column));

  format!(
    "CREATE TABLE IF NOT EXISTS {table} (\n  {}\n);\nCREATE INDEX IF NOT EXISTS {} ON {table} ({});",
    columns.join(",\n  "),
    quote_ident(&format!("{}{PROJECT_INDEX_SUFFIX}", plan.table_name)),
    quote_ident(PROJECT_COLUMN),
  )
}

// ─── Catalogue helpers ───────────────────────────────────────────────────────

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
  conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
    [name],
    |r| r.get(0),
  )
}

fn column_count(conn: &Connection, name: &str) -> rusqlite::Result<usize> {
  let n: i64 =
    conn.query_row("SELECT COUNT(*) FROM pragma_table_info(?1)", [name], |r| r.get(0))?;
  Ok(usize::try_from(n).unwrap_or_default())
}

/// `(name, declared type)` for every column of `plan`'s table, fixed columns
/// first, as `pragma_table_info` reports them after [`render_ddl`].
fn expected_shape(plan: &TablePlan) -> Vec<(String, String)> {
  let fixed = [
    ("id", "INTEGER"),
    (PROJECT_COLUMN, "TEXT"),
    ("created_at", "TEXT"),
    ("updated_at", "TEXT"),
  ];
  fixed
    .into_iter()
    .map(|(n, t)| (n.to_owned(), t.to_owned()))
    .chain(
      plan
        .columns
        .iter()
        .map(|c| (c.name.clone(), sql_type(c.column_type).to_owned())),
    )
    .collect()
}

fn actual_shape(conn: &Connection, name: &str) -> rusqlite::Result<Vec<(String, String)>> {
  let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
  let shape = stmt
    .query_map([name], |r| {
      Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?.to_ascii_uppercase()))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(shape)
}

/// Whether `table` holds any row not stamped with `project`.
fn foreign_rows(conn: &Connection, table: &str, project: &str) -> rusqlite::Result<bool> {
  conn.query_row(
    &format!(
      "SELECT EXISTS (SELECT 1 FROM {} WHERE {} IS NOT ?1)",
      quote_ident(table),
      quote_ident(PROJECT_COLUMN)
    ),
    [project],
    |r| r.get(0),
  )
}

fn project_rows(conn: &Connection, table: &str, project: &str) -> rusqlite::Result<i64> {
  conn.query_row(
    &format!(
      "SELECT COUNT(*) FROM {} WHERE {} = ?1",
      quote_ident(table),
      quote_ident(PROJECT_COLUMN)
    ),
    [project],
    |r| r.get(0),
  )
}

/// Physical tables that are neither SQLite's nor ours and carry a
/// `project_id` column.
fn tenant_shaped_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT m.name FROM sqlite_master m
     WHERE m.type = 'table'
       AND m.name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
       AND EXISTS (SELECT 1 FROM pragma_table_info(m.name) p WHERE p.name = ?1)
     ORDER BY m.name",
  )?;
  let names = stmt
    .query_map([PROJECT_COLUMN], |r| r.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(
    names
      .into_iter()
      .filter(|n| !SYSTEM_TABLES.contains(&n.as_str()))
      .collect(),
  )
}

fn summary(conn: &Connection, table: String, project: &str) -> rusqlite::Result<TableSummary> {
  Ok(TableSummary {
    column_count:       column_count(conn, &table)?,
    row_count_estimate: project_rows(conn, &table, project)?,
    table_name:         table,
  })
}

/// Outcome of the registration transaction.
enum Registration {
  Done { previous: Option<String>, column_count: usize },
  /// The physical table exists but cannot be handed to the caller.
  Refused(String),
}

/// What `list_tables` found, before logging.
struct Listing {
  tables:   Vec<TableSummary>,
  healed:   Vec<String>,
  fallback: bool,
}

// ─── Operations ──────────────────────────────────────────────────────────────

impl SqliteStore {
  pub(crate) async fn register_table(
    &self,
    project: &ProjectId,
    input: CreateTable,
  ) -> Result<TableCreated> {
    let plan = TablePlan::build(&input, SYSTEM_TABLES)?;
    for c in &plan.coerced {
      tracing::warn!(
        project = %project,
        table = %plan.table_name,
        column = %c.name,
        requested = %c.requested_type,
        "unknown column type, storing as text"
      );
    }

    let ddl        = render_ddl(&plan);
    let expected   = expected_shape(&plan);
    let pid        = project.as_str().to_owned();
    let table      = plan.table_name.clone();
    let created_by = input.created_by.clone();
    let now        = encode_dt(Utc::now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if table_exists(&tx, &table)? {
          if actual_shape(&tx, &table)? != expected {
            return Ok(Registration::Refused(format!(
              "table {table:?} already exists with different columns"
            )));
          }
          if foreign_rows(&tx, &table, &pid)? {
            return Ok(Registration::Refused(format!(
              "table {table:?} already holds another project's rows"
            )));
          }
        }
        tx.execute_batch(&ddl)?;
        let previous = tx
          .query_row(
            "SELECT project_id FROM table_registry WHERE table_name = ?1",
            [&table],
            |r| r.get::<_, String>(0),
          )
          .optional()?;
        tx.execute(
          "INSERT INTO table_registry (table_name, project_id, created_by, created_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (table_name) DO UPDATE SET
             project_id = excluded.project_id,
             created_by = excluded.created_by,
             created_at = excluded.created_at",
          rusqlite::params![table, pid, created_by, now],
        )?;
        let column_count = column_count(&tx, &table)?;
        tx.commit()?;
        Ok(Registration::Done { previous, column_count })
      })
      .await?;

    let (previous, column_count) = match outcome {
      Registration::Done { previous, column_count } => (previous, column_count),
      Registration::Refused(reason) => {
        tracing::warn!(
          project = %project,
          table = %plan.table_name,
          %reason,
          "create table refused"
        );
        return Err(stratum_core::Error::Validation(reason).into());
      }
    };

    match previous {
      Some(prev) if prev != project.as_str() => tracing::warn!(
        table = %plan.table_name,
        previous_owner = %prev,
        owner = %project,
        "table ownership transferred"
      ),
      _ => tracing::info!(project = %project, table = %plan.table_name, "created table"),
    }

    Ok(TableCreated {
      column_count,
      table_name:      plan.table_name,
      coerced_columns: plan.coerced,
      dropped_columns: plan.dropped,
    })
  }

  pub(crate) async fn visible_tables(&self, project: &ProjectId) -> Result<Vec<TableSummary>> {
    let pid = project.as_str().to_owned();

    let listing = self
      .conn
      .call(move |conn| {
        let any_registered: bool =
          conn.query_row("SELECT EXISTS (SELECT 1 FROM table_registry)", [], |r| r.get(0))?;

        if !any_registered {
          let mut tables = Vec::new();
          for name in tenant_shaped_tables(conn)? {
            if project_rows(conn, &name, &pid)? > 0 {
              tables.push(summary(conn, name, &pid)?);
            }
          }
          return Ok(Listing { tables, healed: Vec::new(), fallback: true });
        }

        let registered: Vec<String> = {
          let mut stmt = conn.prepare(
            "SELECT table_name FROM table_registry WHERE project_id = ?1 ORDER BY table_name",
          )?;
          stmt
            .query_map([&pid], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut tables = Vec::new();
        let mut healed = Vec::new();
        for name in registered {
          if table_exists(conn, &name)? {
            tables.push(summary(conn, name, &pid)?);
          } else {
            conn.execute("DELETE FROM table_registry WHERE table_name = ?1", [&name])?;
            healed.push(name);
          }
        }
        Ok(Listing { tables, healed, fallback: false })
      })
      .await?;

    for name in &listing.healed {
      tracing::warn!(project = %project, table = %name, "removed registry entry for missing table");
    }
    if listing.fallback {
      tracing::debug!(project = %project, "registry empty, listed tables by row ownership");
    }
    Ok(listing.tables)
  }

  pub(crate) async fn registered_tables(&self, project: &ProjectId) -> Result<BTreeSet<String>> {
    let pid = project.as_str().to_owned();
    let names = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare("SELECT table_name FROM table_registry WHERE project_id = ?1")?;
        let names = stmt
          .query_map([&pid], |r| r.get(0))?
          .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(names)
      })
      .await?;
    Ok(names)
  }

  pub(crate) async fn reconcile(&self) -> Result<ReconcileReport> {
    let report = self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;

        let registered: Vec<String> = {
          let mut stmt = tx.prepare("SELECT table_name FROM table_registry ORDER BY table_name")?;
          stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut report = ReconcileReport::default();
        for name in &registered {
          if !table_exists(&tx, name)? {
            tx.execute("DELETE FROM table_registry WHERE table_name = ?1", [name])?;
            report.removed_stale.push(name.clone());
          }
        }
        report.unregistered = tenant_shaped_tables(&tx)?
          .into_iter()
          .filter(|n| !registered.contains(n))
          .collect();

        tx.commit()?;
        Ok(report)
      })
      .await?;

    for name in &report.removed_stale {
      tracing::warn!(table = %name, "removed registry entry for missing table");
    }
    for name in &report.unregistered {
      tracing::warn!(table = %name, "tenant-shaped table has no registry entry");
    }
    Ok(report)
  }
}
