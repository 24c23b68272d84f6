//! Dynamic table requests and the validated plan built from them.
//!
//! [`TablePlan::build`] is the single place where tenant-supplied table
//! definitions are checked. Storage backends only ever render a plan, never a
//! raw [`CreateTable`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, ident::validate_sql_ident};

/// Columns every tenant table carries, in order. Caller columns with these
/// names are dropped from the plan.
pub const FIXED_COLUMNS: [&str; 4] = ["id", "project_id", "created_at", "updated_at"];

/// Name of the owning-project column on every tenant table.
pub const PROJECT_COLUMN: &str = "project_id";

/// Suffix of the per-table `project_id` index. Indexes share the table
/// namespace, so no table name may end with it.
pub const PROJECT_INDEX_SUFFIX: &str = "_project_id_idx";

const MAX_COLUMNS: usize = 128;

// ─── Request types ───────────────────────────────────────────────────────────

/// One caller-declared column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
  pub name:        String,
  #[serde(rename = "type")]
  pub column_type: String,
  #[serde(default)]
  pub primary_key: bool,
  pub nullable:    Option<bool>,
  pub default:     Option<Value>,
  #[serde(default)]
  pub unique:      bool,
}

impl ColumnSpec {
  pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
    Self {
      name:        name.into(),
      column_type: column_type.into(),
      primary_key: false,
      nullable:    None,
      default:     None,
      unique:      false,
    }
  }
}

/// Input to `TenantStore::create_table`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTable {
  pub table_name: String,
  #[serde(default)]
  pub columns:    Vec<ColumnSpec>,
  /// Free-form actor label recorded in the registry.
  pub created_by: Option<String>,
}

// ─── Column types ────────────────────────────────────────────────────────────

/// The allow-listed column types, collapsed to what the store can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
  Text,
  Integer,
  Real,
  Numeric,
  Boolean,
  Json,
  Date,
  Timestamp,
  Time,
  Uuid,
  Blob,
}

impl ColumnType {
  /// Parse a declared type such as `VARCHAR(255)` or `timestamptz`.
  /// Returns `None` for anything outside the allow-list.
  pub fn parse(declared: &str) -> Option<Self> {
    let lowered = declared.trim().to_ascii_lowercase();
    let base = lowered
      .split_once('(')
      .map_or(lowered.as_str(), |(b, _)| b)
      .trim();

    let ty = match base {
      "text" | "varchar" | "char" | "character varying" => Self::Text,
      "integer" | "int" | "bigint" | "smallint" | "serial" | "bigserial" => Self::Integer,
      "real" | "float" | "double" | "double precision" => Self::Real,
      "numeric" | "decimal" => Self::Numeric,
      "boolean" | "bool" => Self::Boolean,
      "json" | "jsonb" => Self::Json,
      "date" => Self::Date,
      "timestamp" | "timestamptz" => Self::Timestamp,
      "time" => Self::Time,
      "uuid" => Self::Uuid,
      "blob" | "bytea" => Self::Blob,
      _ => return None,
    };
    Some(ty)
  }
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// A caller column whose declared type was not recognised and was stored as
/// text instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoercedColumn {
  pub name:           String,
  pub requested_type: String,
}

/// A validated caller column.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedColumn {
  pub name:        String,
  pub column_type: ColumnType,
  pub not_null:    bool,
  pub unique:      bool,
  pub default:     Option<Value>,
}

/// The validated, normalised form of a [`CreateTable`].
#[derive(Debug, Clone)]
pub struct TablePlan {
  pub table_name: String,
  pub columns:    Vec<PlannedColumn>,
  pub coerced:    Vec<CoercedColumn>,
  pub dropped:    Vec<String>,
}

impl TablePlan {
  /// Validate `input`. `reserved` lists table names tenants may never claim.
  ///
  /// Unknown types are coerced to [`ColumnType::Text`] and reported in
  /// `coerced`; caller columns named like a fixed column are reported in
  /// `dropped`. Neither is an error.
  pub fn build(input: &CreateTable, reserved: &[&str]) -> Result<Self> {
    validate_sql_ident("table name", &input.table_name)?;
    if input.table_name.starts_with("sqlite_")
      || input.table_name.ends_with(PROJECT_INDEX_SUFFIX)
      || reserved.contains(&input.table_name.as_str())
    {
      return Err(Error::Validation(format!(
        "table name {:?} is reserved",
        input.table_name
      )));
    }
    if input.columns.len() > MAX_COLUMNS {
      return Err(Error::Validation(format!(
        "a table may declare at most {MAX_COLUMNS} columns"
      )));
    }

    let mut seen    = BTreeSet::new();
    let mut columns = Vec::with_capacity(input.columns.len());
    let mut coerced = Vec::new();
    let mut dropped = Vec::new();

    for spec in &input.columns {
      validate_sql_ident("column name", &spec.name)?;
      if !seen.insert(spec.name.as_str()) {
        return Err(Error::Validation(format!("duplicate column {:?}", spec.name)));
      }
      if FIXED_COLUMNS.contains(&spec.name.as_str()) {
        dropped.push(spec.name.clone());
        continue;
      }

      let column_type = match ColumnType::parse(&spec.column_type) {
        Some(t) => t,
        None => {
          coerced.push(CoercedColumn {
            name:           spec.name.clone(),
            requested_type: spec.column_type.clone(),
          });
          ColumnType::Text
        }
      };

      if let Some(default) = &spec.default {
        check_default(&spec.name, column_type, default)?;
      }

      columns.push(PlannedColumn {
        name: spec.name.clone(),
        column_type,
        not_null: spec.primary_key || spec.nullable == Some(false),
        unique: spec.primary_key || spec.unique,
        default: spec.default.clone(),
      });
    }

    Ok(Self {
      table_name: input.table_name.clone(),
      columns,
      coerced,
      dropped,
    })
  }

  /// Fixed plus caller columns.
  pub fn column_count(&self) -> usize { FIXED_COLUMNS.len() + self.columns.len() }
}

fn check_default(column: &str, ty: ColumnType, default: &Value) -> Result<()> {
  match default {
    Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
    Value::Array(_) | Value::Object(_) if ty == ColumnType::Json => Ok(()),
    _ => Err(Error::Validation(format!(
      "default for column {column:?} must be a scalar"
    ))),
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Returned by `TenantStore::create_table`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCreated {
  pub table_name:      String,
  pub column_count:    usize,
  pub coerced_columns: Vec<CoercedColumn>,
  pub dropped_columns: Vec<String>,
}

/// One row of `TenantStore::list_tables`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
  pub table_name:         String,
  pub column_count:       usize,
  pub row_count_estimate: i64,
}

/// Outcome of a full registry reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
  /// Registry rows removed because their table no longer exists.
  pub removed_stale: Vec<String>,
  /// Tables carrying a `project_id` column with no registry row.
  pub unregistered:  Vec<String>,
}
