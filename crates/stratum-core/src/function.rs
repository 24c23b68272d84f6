//! Function definitions and their file sets.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  ident::{slugify, validate_file_path},
};

/// The path a multi-file function must use for its entry point.
pub const ENTRY_POINT: &str = "index.js";

fn default_trigger() -> String { "http".to_owned() }

/// A deployed function's definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
  pub id:           Uuid,
  pub name:         String,
  pub slug:         String,
  pub trigger_type: String,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

/// One source file belonging to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFile {
  pub path:    String,
  pub content: String,
}

impl FunctionFile {
  pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
    Self { path: path.into(), content: content.into() }
  }
}

/// A function together with its files, ordered by path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionWithFiles {
  #[serde(flatten)]
  pub function: Function,
  pub files:    Vec<FunctionFile>,
}

impl FunctionWithFiles {
  /// Choose the file to run first: the canonical [`ENTRY_POINT`], or the
  /// only file when there is exactly one.
  pub fn entry_file(&self) -> Option<&FunctionFile> {
    self
      .files
      .iter()
      .find(|f| f.path == ENTRY_POINT)
      .or_else(|| match self.files.as_slice() {
        [only] => Some(only),
        _ => None,
      })
  }
}

/// Input to `TenantStore::deploy_function`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployFunction {
  pub name:         String,
  #[serde(default = "default_trigger")]
  pub trigger_type: String,
  #[serde(default)]
  pub files:        Vec<FunctionFile>,
}

impl DeployFunction {
  pub fn new(name: impl Into<String>, files: Vec<FunctionFile>) -> Self {
    Self { name: name.into(), trigger_type: default_trigger(), files }
  }

  /// Validate the request and return the slug it deploys to.
  pub fn validate(&self) -> Result<String> {
    let slug = slugify(&self.name)?;

    if self.trigger_type.trim().is_empty() {
      return Err(Error::Validation("trigger type must not be empty".into()));
    }

    let mut seen = BTreeSet::new();
    for file in &self.files {
      validate_file_path(&file.path)?;
      if !seen.insert(file.path.as_str()) {
        return Err(Error::Validation(format!("duplicate file path {:?}", file.path)));
      }
    }
    Ok(slug)
  }
}
