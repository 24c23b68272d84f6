//! Function definitions and their source files.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _};
use stratum_core::{
  ProjectId,
  function::{DeployFunction, FunctionFile, FunctionWithFiles},
};
use uuid::Uuid;

use crate::{
  Result,
  encode::{RawFunction, encode_dt, encode_uuid},
  store::SqliteStore,
};

type RawFunctionWithFiles = (RawFunction, Vec<FunctionFile>);

fn files_of(conn: &Connection, function_id: &str) -> rusqlite::Result<Vec<FunctionFile>> {
  let mut stmt =
    conn.prepare("SELECT path, content FROM function_files WHERE function_id = ?1 ORDER BY path")?;
  let files = stmt
    .query_map([function_id], |r| Ok(FunctionFile { path: r.get(0)?, content: r.get(1)? }))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(files)
}

fn load_one(
  conn: &Connection,
  project: &str,
  slug: &str,
) -> rusqlite::Result<Option<RawFunctionWithFiles>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {} FROM functions WHERE project_id = ?1 AND slug = ?2",
        RawFunction::COLUMNS
      ),
      [project, slug],
      RawFunction::from_row,
    )
    .optional()?;

  match raw {
    Some(raw) => {
      let files = files_of(conn, &raw.function_id)?;
      Ok(Some((raw, files)))
    }
    None => Ok(None),
  }
}

fn decode((raw, files): RawFunctionWithFiles) -> Result<FunctionWithFiles> {
  Ok(FunctionWithFiles { function: raw.into_function()?, files })
}

impl SqliteStore {
  pub(crate) async fn upsert_function(
    &self,
    project: &ProjectId,
    input: DeployFunction,
  ) -> Result<FunctionWithFiles> {
    let slug = input.validate()?;

    let pid      = project.as_str().to_owned();
    let new_id   = encode_uuid(Uuid::new_v4());
    let now      = encode_dt(Utc::now());
    let slug_arg = slug.clone();
    let count    = input.files.len();

    let loaded = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let function_id: String = tx.query_row(
          "INSERT INTO functions
             (function_id, project_id, name, slug, trigger_type, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
           ON CONFLICT (project_id, slug) DO UPDATE SET
             name         = excluded.name,
             trigger_type = excluded.trigger_type,
             updated_at   = excluded.updated_at
           RETURNING function_id",
          rusqlite::params![new_id, pid, input.name, slug_arg, input.trigger_type, now],
          |r| r.get(0),
        )?;

        {
          let mut stmt = tx.prepare(
            "INSERT INTO function_files (function_id, path, content, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (function_id, path) DO UPDATE SET
               content    = excluded.content,
               updated_at = excluded.updated_at",
          )?;
          for file in &input.files {
            stmt.execute(rusqlite::params![function_id, file.path, file.content, now])?;
          }
        }

        let loaded = load_one(&tx, &pid, &slug_arg)?;
        tx.commit()?;
        Ok(loaded)
      })
      .await?;

    tracing::info!(project = %project, slug = %slug, files = count, "deployed function");
    match loaded {
      Some(found) => decode(found),
      None => Err(stratum_core::Error::NotFound(format!("function {slug:?}")).into()),
    }
  }

  pub(crate) async fn functions_for(&self, project: &ProjectId) -> Result<Vec<FunctionWithFiles>> {
    let pid = project.as_str().to_owned();
    let rows = self
      .conn
      .call(move |conn| {
        let raws: Vec<RawFunction> = {
          let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM functions WHERE project_id = ?1 ORDER BY slug",
            RawFunction::COLUMNS
          ))?;
          stmt
            .query_map([&pid], RawFunction::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut rows = Vec::with_capacity(raws.len());
        for raw in raws {
          let files = files_of(conn, &raw.function_id)?;
          rows.push((raw, files));
        }
        Ok(rows)
      })
      .await?;
    rows.into_iter().map(decode).collect()
  }

  pub(crate) async fn function_by_slug(
    &self,
    project: &ProjectId,
    slug: &str,
  ) -> Result<Option<FunctionWithFiles>> {
    let pid  = project.as_str().to_owned();
    let slug = slug.to_owned();
    let found = self
      .conn
      .call(move |conn| Ok(load_one(conn, &pid, &slug)?))
      .await?;
    found.map(decode).transpose()
  }

  pub(crate) async fn remove_function(&self, project: &ProjectId, slug: &str) -> Result<bool> {
    let pid  = project.as_str().to_owned();
    let slug = slug.to_owned();
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM functions WHERE project_id = ?1 AND slug = ?2",
          [&pid, &slug],
        )?)
      })
      .await?;
    Ok(n > 0)
  }
}
