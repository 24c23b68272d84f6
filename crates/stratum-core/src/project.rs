//! Tenant identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const MAX_PROJECT_ID_LEN: usize = 128;

/// An opaque, already-authenticated project identifier.
///
/// The only structural guarantees are that it is non-empty, bounded in
/// length and free of control characters, so it can be bound as a SQL
/// parameter and used as associated data without surprises.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
  pub fn new(id: impl Into<String>) -> Result<Self> {
    let id = id.into();
    if id.is_empty() {
      return Err(Error::Validation("project id must not be empty".into()));
    }
    if id.len() > MAX_PROJECT_ID_LEN {
      return Err(Error::Validation(format!(
        "project id exceeds {MAX_PROJECT_ID_LEN} bytes"
      )));
    }
    if id.chars().any(char::is_control) {
      return Err(Error::Validation(
        "project id must not contain control characters".into(),
      ));
    }
    Ok(Self(id))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ProjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for ProjectId {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::new(value) }
}

impl From<ProjectId> for String {
  fn from(value: ProjectId) -> Self { value.0 }
}

impl AsRef<str> for ProjectId {
  fn as_ref(&self) -> &str { &self.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_empty_and_control_chars() {
    assert!(ProjectId::new("").is_err());
    assert!(ProjectId::new("a\nb").is_err());
    assert!(ProjectId::new("x".repeat(129)).is_err());
    assert_eq!(ProjectId::new("proj_1").unwrap().as_str(), "proj_1");
  }

  #[test]
  fn deserialises_through_validation() {
    let ok: ProjectId = serde_json::from_str("\"acme\"").unwrap();
    assert_eq!(ok.to_string(), "acme");
    assert!(serde_json::from_str::<ProjectId>("\"\"").is_err());
  }
}
