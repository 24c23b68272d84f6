//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. UUIDs are stored as
//! hyphenated lowercase strings. Tenant values cross the boundary as JSON.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::{DateTime, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};
use stratum_core::{function::Function, secret::Secret};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc>
// ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Identifiers & literals ───────────────────────────────────────────────────

/// Double-quote an identifier for interpolation into SQL.
///
/// Tenant-chosen names are validated before they get here; names read back
/// from `sqlite_master` may not be, hence the escaping.
pub fn quote_ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

/// Render a JSON default as an SQL literal.
pub fn sql_literal(value: &Value) -> String {
  match value {
    Value::Null => "NULL".to_owned(),
    Value::Bool(b) => (if *b { "1" } else { "0" }).to_owned(),
    Value::Number(n) => n.to_string(),
    Value::String(s) => format!("'{}'", s.replace('\'', "''")),
    other => format!("'{}'", other.to_string().replace('\'', "''")),
  }
}

// ─── JSON ⇄ SQLite values ─────────────────────────────────────────────────────

pub fn json_to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => SqlValue::Real(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    other => SqlValue::Text(other.to_string()),
  }
}

pub fn sql_to_json(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::from(i),
    ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => Value::String(B64.encode(b)),
  }
}

// ─── Raw row types ────────────────────────────────────────────────────────────

/// A `secrets` row before decoding.
pub struct RawSecret {
  pub secret_id:   String,
  pub name:        String,
  pub ciphertext:  String,
  pub description: Option<String>,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawSecret {
  pub const COLUMNS: &'static str =
    "secret_id, name, ciphertext, description, created_at, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      secret_id:   row.get(0)?,
      name:        row.get(1)?,
      ciphertext:  row.get(2)?,
      description: row.get(3)?,
      created_at:  row.get(4)?,
      updated_at:  row.get(5)?,
    })
  }

  pub fn to_secret(&self) -> Result<Secret> {
    Ok(Secret {
      id:          decode_uuid(&self.secret_id)?,
      name:        self.name.clone(),
      description: self.description.clone(),
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

/// A `functions` row before decoding.
pub struct RawFunction {
  pub function_id:  String,
  pub name:         String,
  pub slug:         String,
  pub trigger_type: String,
  pub created_at:   String,
  pub updated_at:   String,
}

impl RawFunction {
  pub const COLUMNS: &'static str =
    "function_id, name, slug, trigger_type, created_at, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      function_id:  row.get(0)?,
      name:         row.get(1)?,
      slug:         row.get(2)?,
      trigger_type: row.get(3)?,
      created_at:   row.get(4)?,
      updated_at:   row.get(5)?,
    })
  }

  pub fn into_function(self) -> Result<Function> {
    Ok(Function {
      id:           decode_uuid(&self.function_id)?,
      name:         self.name,
      slug:         self.slug,
      trigger_type: self.trigger_type,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}
