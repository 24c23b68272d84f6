//! The `TenantStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `stratum-store-sqlite`).
//! Higher layers (`stratum-runtime`, `stratum-api`) depend on this
//! abstraction, not on any concrete backend.
//!
//! Every method takes the calling [`ProjectId`] explicitly. Implementations
//! must never return or touch another project's rows.

use std::{collections::BTreeSet, future::Future};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
  Classify, ProjectId,
  function::{DeployFunction, FunctionWithFiles},
  secret::{NewSecret, Secret, SecretSet, SecretSummary},
  table::{CreateTable, ReconcileReport, TableCreated, TableSummary},
};

/// Abstraction over a Stratum storage backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait TenantStore: Send + Sync {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  // ── Vault ─────────────────────────────────────────────────────────────

  /// Encrypt and upsert a secret by `(project, name)`.
  ///
  /// Fails with a validation error, writing nothing, if the name does not
  /// match `^[A-Z_][A-Z0-9_]*$`.
  fn put_secret<'a>(
    &'a self,
    project: &'a ProjectId,
    secret: NewSecret,
  ) -> impl Future<Output = Result<Secret, Self::Error>> + Send + 'a;

  /// List secret metadata with a digest of each value, or a per-entry
  /// decryption failure marker.
  fn list_secrets<'a>(
    &'a self,
    project: &'a ProjectId,
  ) -> impl Future<Output = Result<Vec<SecretSummary>, Self::Error>> + Send + 'a;

  /// Delete a secret by `(project, id)`. Returns `false` if nothing matched.
  fn delete_secret<'a>(
    &'a self,
    project: &'a ProjectId,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Decrypt every secret of `project`. Entries that fail to decrypt are
  /// reported by name and omitted from the values.
  fn decrypt_secrets<'a>(
    &'a self,
    project: &'a ProjectId,
  ) -> impl Future<Output = Result<SecretSet, Self::Error>> + Send + 'a;

  /// Replace the project's salt. All existing secrets of the project stop
  /// decrypting until they are written again.
  fn rotate_salt<'a>(
    &'a self,
    project: &'a ProjectId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Registry ──────────────────────────────────────────────────────────

  /// Create a tenant table and record `project` as its owner.
  fn create_table<'a>(
    &'a self,
    project: &'a ProjectId,
    input: CreateTable,
  ) -> impl Future<Output = Result<TableCreated, Self::Error>> + Send + 'a;

  /// Tables visible to `project`. Stale registry rows are healed on the way.
  fn list_tables<'a>(
    &'a self,
    project: &'a ProjectId,
  ) -> impl Future<Output = Result<Vec<TableSummary>, Self::Error>> + Send + 'a;

  /// The registry-authoritative set of table names owned by `project`.
  fn owned_tables<'a>(
    &'a self,
    project: &'a ProjectId,
  ) -> impl Future<Output = Result<BTreeSet<String>, Self::Error>> + Send + 'a;

  /// Drop registry rows for missing tables and report unregistered tables.
  fn reconcile_registry(
    &self,
  ) -> impl Future<Output = Result<ReconcileReport, Self::Error>> + Send + '_;

  // ── Namespace-pinned data access ──────────────────────────────────────

  /// Run one SQL statement that may only address tables `project` owns.
  ///
  /// Statements producing columns return an array of row objects; others
  /// return `{ "changes": n }`.
  fn tenant_query<'a>(
    &'a self,
    project: &'a ProjectId,
    sql: String,
    params: Vec<Value>,
  ) -> impl Future<Output = Result<Value, Self::Error>> + Send + 'a;

  /// Insert a row into an owned table, forcing `project_id` to the caller.
  /// Returns the new row id.
  fn tenant_insert<'a>(
    &'a self,
    project: &'a ProjectId,
    table: String,
    row: Map<String, Value>,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  /// Select the caller's rows from an owned table, filtered by equality on
  /// each entry of `filter`.
  fn tenant_select<'a>(
    &'a self,
    project: &'a ProjectId,
    table: String,
    filter: Map<String, Value>,
  ) -> impl Future<Output = Result<Vec<Value>, Self::Error>> + Send + 'a;

  // ── Functions ─────────────────────────────────────────────────────────

  /// Upsert a function by `(project, slug)` and upsert its files by path.
  /// The function id and slug are stable across redeploys.
  fn deploy_function<'a>(
    &'a self,
    project: &'a ProjectId,
    input: DeployFunction,
  ) -> impl Future<Output = Result<FunctionWithFiles, Self::Error>> + Send + 'a;

  fn list_functions<'a>(
    &'a self,
    project: &'a ProjectId,
  ) -> impl Future<Output = Result<Vec<FunctionWithFiles>, Self::Error>> + Send + 'a;

  fn get_function<'a>(
    &'a self,
    project: &'a ProjectId,
    slug: &'a str,
  ) -> impl Future<Output = Result<Option<FunctionWithFiles>, Self::Error>> + Send + 'a;

  /// Returns `false` if no such function existed.
  fn delete_function<'a>(
    &'a self,
    project: &'a ProjectId,
    slug: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Lifecycle ─────────────────────────────────────────────────────────

  /// Remove everything `project` owns: secrets, key material, functions,
  /// registered tables. Called by the external project-deletion flow.
  fn purge_project<'a>(
    &'a self,
    project: &'a ProjectId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
