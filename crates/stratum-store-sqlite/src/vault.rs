//! Secret storage: project salts, sealing on write, opening on read.
//!
//! The derived key never leaves the async task that needed it. Argon2 is
//! CPU-bound, so derivation runs on the blocking pool.

use chrono::Utc;
use stratum_core::{
  ProjectId,
  ident::validate_secret_name,
  secret::{NewSecret, Secret, SecretDigest, SecretSet, SecretSummary},
};
use stratum_vault::{ProjectKey, Vault};
use uuid::Uuid;

use crate::{
  Result,
  encode::{RawSecret, encode_dt, encode_uuid},
  store::SqliteStore,
};

/// Associated data binding a sealed value to its owner and name.
fn secret_aad(project: &ProjectId, name: &str) -> Vec<u8> {
  format!("{project}/{name}").into_bytes()
}

impl SqliteStore {
  /// Fetch the project's salt, creating it on first use.
  ///
  /// `INSERT OR IGNORE` followed by a read in the same call means two racing
  /// first writers agree on whichever salt landed first.
  async fn project_salt(&self, project: &ProjectId) -> Result<Vec<u8>> {
    let pid       = project.as_str().to_owned();
    let candidate = Vault::generate_salt().to_vec();
    let now       = encode_dt(Utc::now());

    let salt = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO project_keys (project_id, salt, created_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![pid, candidate, now],
        )?;
        let salt: Vec<u8> = conn.query_row(
          "SELECT salt FROM project_keys WHERE project_id = ?1",
          [&pid],
          |r| r.get(0),
        )?;
        Ok(salt)
      })
      .await?;
    Ok(salt)
  }

  async fn derive(&self, salt: Vec<u8>) -> Result<ProjectKey> {
    let vault = self.vault.clone();
    Ok(tokio::task::spawn_blocking(move || vault.derive_key(&salt)).await??)
  }

  async fn raw_secrets(&self, project: &ProjectId) -> Result<Vec<RawSecret>> {
    let pid = project.as_str().to_owned();
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM secrets WHERE project_id = ?1 ORDER BY name",
          RawSecret::COLUMNS
        ))?;
        let rows = stmt
          .query_map([&pid], RawSecret::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }

  pub(crate) async fn store_secret(&self, project: &ProjectId, input: NewSecret) -> Result<Secret> {
    validate_secret_name(&input.name)?;

    let key    = self.derive(self.project_salt(project).await?).await?;
    let sealed = key.seal(input.value.as_bytes(), &secret_aad(project, &input.name))?;
    drop(key);

    let pid         = project.as_str().to_owned();
    let id          = encode_uuid(Uuid::new_v4());
    let now         = encode_dt(Utc::now());
    let name        = input.name.clone();
    let description = input.description.clone();

    let raw = self
      .conn
      .call(move |conn| {
        let raw = conn.query_row(
          &format!(
            "INSERT INTO secrets
               (secret_id, project_id, name, ciphertext, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (project_id, name) DO UPDATE SET
               ciphertext  = excluded.ciphertext,
               description = COALESCE(excluded.description, secrets.description),
               updated_at  = excluded.updated_at
             RETURNING {}",
            RawSecret::COLUMNS
          ),
          rusqlite::params![id, pid, name, sealed, description, now],
          RawSecret::from_row,
        )?;
        Ok(raw)
      })
      .await?;

    tracing::info!(project = %project, name = %input.name, "stored secret");
    raw.to_secret()
  }

  pub(crate) async fn secret_summaries(&self, project: &ProjectId) -> Result<Vec<SecretSummary>> {
    let rows = self.raw_secrets(project).await?;
    if rows.is_empty() {
      return Ok(Vec::new());
    }

    let key = self.derive(self.project_salt(project).await?).await?;
    rows
      .iter()
      .map(|raw| {
        let digest = match key.open(&raw.ciphertext, &secret_aad(project, &raw.name)) {
          Ok(plain) => SecretDigest::Digest(stratum_vault::digest(&plain)),
          Err(e) => {
            tracing::warn!(project = %project, name = %raw.name, error = %e, "secret did not decrypt");
            SecretDigest::DecryptionFailed
          }
        };
        Ok(SecretSummary { secret: raw.to_secret()?, digest })
      })
      .collect()
  }

  pub(crate) async fn remove_secret(&self, project: &ProjectId, id: Uuid) -> Result<bool> {
    let pid = project.as_str().to_owned();
    let sid = encode_uuid(id);
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM secrets WHERE project_id = ?1 AND secret_id = ?2",
          [&pid, &sid],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  pub(crate) async fn open_secrets(&self, project: &ProjectId) -> Result<SecretSet> {
    let rows = self.raw_secrets(project).await?;
    let mut set = SecretSet::default();
    if rows.is_empty() {
      return Ok(set);
    }

    let key = self.derive(self.project_salt(project).await?).await?;
    for raw in rows {
      match key.open_string(&raw.ciphertext, &secret_aad(project, &raw.name)) {
        Ok(value) => {
          set.values.insert(raw.name, value);
        }
        Err(_) => set.failed.push(raw.name),
      }
    }
    Ok(set)
  }

  pub(crate) async fn replace_salt(&self, project: &ProjectId) -> Result<()> {
    let pid  = project.as_str().to_owned();
    let salt = Vault::generate_salt().to_vec();
    let now  = encode_dt(Utc::now());

    let invalidated: i64 = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO project_keys (project_id, salt, created_at) VALUES (?1, ?2, ?3)
           ON CONFLICT (project_id) DO UPDATE SET
             salt = excluded.salt, created_at = excluded.created_at",
          rusqlite::params![pid, salt, now],
        )?;
        let n: i64 = tx.query_row(
          "SELECT COUNT(*) FROM secrets WHERE project_id = ?1",
          [&pid],
          |r| r.get(0),
        )?;
        tx.commit()?;
        Ok(n)
      })
      .await?;

    tracing::warn!(project = %project, invalidated, "rotated project salt");
    Ok(())
  }
}
