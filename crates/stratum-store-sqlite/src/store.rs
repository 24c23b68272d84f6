//! [`SqliteStore`] — the SQLite implementation of [`TenantStore`].
//!
//! The trait impl is a thin dispatch layer; each concern lives in its own
//! module (`vault`, `registry`, `tenant`, `functions`).

use std::{collections::BTreeSet, path::Path, time::Duration};

use serde_json::{Map, Value};
use stratum_core::{
  ProjectId,
  function::{DeployFunction, FunctionWithFiles},
  secret::{NewSecret, Secret, SecretSet, SecretSummary},
  store::TenantStore,
  table::{CreateTable, ReconcileReport, TableCreated, TableSummary},
};
use stratum_vault::Vault;
use uuid::Uuid;

use crate::{Error, Result, encode::quote_ident, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// How long one tenant statement may run before it is interrupted.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A Stratum store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted and the
/// vault only holds the service secret.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn:              tokio_rusqlite::Connection,
  pub(crate) vault:             Vault,
  pub(crate) statement_timeout: Duration,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>, vault: Vault) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, vault, statement_timeout: DEFAULT_STATEMENT_TIMEOUT };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory(vault: Vault) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, vault, statement_timeout: DEFAULT_STATEMENT_TIMEOUT };
    store.init_schema().await?;
    Ok(store)
  }

  /// Cap the run time of each tenant statement. Platform queries are not
  /// affected.
  pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
    self.statement_timeout = timeout;
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Cascade-delete everything `project` owns.
  async fn purge(&self, project: &ProjectId) -> Result<()> {
    let pid = project.as_str().to_owned();

    let dropped: Vec<String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let tables: Vec<String> = {
          let mut stmt =
            tx.prepare("SELECT table_name FROM table_registry WHERE project_id = ?1")?;
          stmt
            .query_map([&pid], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        for table in &tables {
          tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))?;
        }

        tx.execute("DELETE FROM table_registry WHERE project_id = ?1", [&pid])?;
        tx.execute(
          "DELETE FROM function_files WHERE function_id IN
             (SELECT function_id FROM functions WHERE project_id = ?1)",
          [&pid],
        )?;
        tx.execute("DELETE FROM functions WHERE project_id = ?1", [&pid])?;
        tx.execute("DELETE FROM secrets WHERE project_id = ?1", [&pid])?;
        tx.execute("DELETE FROM project_keys WHERE project_id = ?1", [&pid])?;
        tx.commit()?;
        Ok(tables)
      })
      .await?;

    tracing::info!(project = %project, tables = dropped.len(), "purged project");
    Ok(())
  }
}

// ─── TenantStore impl ────────────────────────────────────────────────────────

impl TenantStore for SqliteStore {
  type Error = Error;

  // ── Vault ─────────────────────────────────────────────────────────────────

  async fn put_secret(&self, project: &ProjectId, secret: NewSecret) -> Result<Secret> {
    self.store_secret(project, secret).await
  }

  async fn list_secrets(&self, project: &ProjectId) -> Result<Vec<SecretSummary>> {
    self.secret_summaries(project).await
  }

  async fn delete_secret(&self, project: &ProjectId, id: Uuid) -> Result<bool> {
    self.remove_secret(project, id).await
  }

  async fn decrypt_secrets(&self, project: &ProjectId) -> Result<SecretSet> {
    self.open_secrets(project).await
  }

  async fn rotate_salt(&self, project: &ProjectId) -> Result<()> {
    self.replace_salt(project).await
  }

  // ── Registry ──────────────────────────────────────────────────────────────

  async fn create_table(&self, project: &ProjectId, input: CreateTable) -> Result<TableCreated> {
    self.register_table(project, input).await
  }

  async fn list_tables(&self, project: &ProjectId) -> Result<Vec<TableSummary>> {
    self.visible_tables(project).await
  }

  async fn owned_tables(&self, project: &ProjectId) -> Result<BTreeSet<String>> {
    self.registered_tables(project).await
  }

  async fn reconcile_registry(&self) -> Result<ReconcileReport> { self.reconcile().await }

  // ── Namespace-pinned data access ──────────────────────────────────────────

  async fn tenant_query(
    &self,
    project: &ProjectId,
    sql:     String,
    params:  Vec<Value>,
  ) -> Result<Value> {
    self.pinned_query(project, sql, params).await
  }

  async fn tenant_insert(
    &self,
    project: &ProjectId,
    table:   String,
    row:     Map<String, Value>,
  ) -> Result<i64> {
    self.pinned_insert(project, table, row).await
  }

  async fn tenant_select(
    &self,
    project: &ProjectId,
    table:   String,
    filter:  Map<String, Value>,
  ) -> Result<Vec<Value>> {
    self.pinned_select(project, table, filter).await
  }

  // ── Functions ─────────────────────────────────────────────────────────────

  async fn deploy_function(
    &self,
    project: &ProjectId,
    input:   DeployFunction,
  ) -> Result<FunctionWithFiles> {
    self.upsert_function(project, input).await
  }

  async fn list_functions(&self, project: &ProjectId) -> Result<Vec<FunctionWithFiles>> {
    self.functions_for(project).await
  }

  async fn get_function(
    &self,
    project: &ProjectId,
    slug:    &str,
  ) -> Result<Option<FunctionWithFiles>> {
    self.function_by_slug(project, slug).await
  }

  async fn delete_function(&self, project: &ProjectId, slug: &str) -> Result<bool> {
    self.remove_function(project, slug).await
  }

  // ── Lifecycle ─────────────────────────────────────────────────────────────

  async fn purge_project(&self, project: &ProjectId) -> Result<()> { self.purge(project).await }
}
