//! SQL schema for the platform tables.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`. Tenant tables are created at runtime by the
//! registry and are not listed here.

/// Platform tables a tenant may never create, read or list.
pub const SYSTEM_TABLES: &[&str] = &[
  "project_keys",
  "secrets",
  "table_registry",
  "functions",
  "function_files",
];

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One salt per project, written once. The derived key is never stored.
CREATE TABLE IF NOT EXISTS project_keys (
    project_id  TEXT PRIMARY KEY,
    salt        BLOB NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS secrets (
    secret_id   TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL,
    name        TEXT NOT NULL,
    ciphertext  TEXT NOT NULL,   -- v1:base64(nonce || ciphertext || tag)
    description TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (project_id, name)
);

-- Flat namespace: one owner per physical table name.
CREATE TABLE IF NOT EXISTS table_registry (
    table_name  TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL,
    created_by  TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS functions (
    function_id  TEXT PRIMARY KEY,
    project_id   TEXT NOT NULL,
    name         TEXT NOT NULL,
    slug         TEXT NOT NULL,
    trigger_type TEXT NOT NULL DEFAULT 'http',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    UNIQUE (project_id, slug)
);

CREATE TABLE IF NOT EXISTS function_files (
    function_id TEXT NOT NULL REFERENCES functions(function_id) ON DELETE CASCADE,
    path        TEXT NOT NULL,
    content     TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (function_id, path)
);

CREATE INDEX IF NOT EXISTS secrets_project_idx   ON secrets(project_id);
CREATE INDEX IF NOT EXISTS registry_project_idx  ON table_registry(project_id);
CREATE INDEX IF NOT EXISTS functions_project_idx ON functions(project_id);

PRAGMA user_version = 1;
";
