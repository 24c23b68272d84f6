//! Secret metadata and the decrypted secret set handed to the runtime.
//!
//! Plaintext only ever lives in [`NewSecret`] on its way in and in
//! [`SecretSet`] on its way out; both zeroize their buffers on drop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Input to `TenantStore::put_secret`.
#[derive(Debug, Clone)]
pub struct NewSecret {
  pub name:        String,
  pub value:       Zeroizing<String>,
  pub description: Option<String>,
}

impl NewSecret {
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name:        name.into(),
      value:       Zeroizing::new(value.into()),
      description: None,
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }
}

/// Stored secret metadata. Never carries the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
  pub id:          Uuid,
  pub name:        String,
  pub description: Option<String>,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

/// What a listing shows in place of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretDigest {
  /// SHA-256 hex digest of the plaintext.
  Digest(String),
  /// The ciphertext did not open under the project's current key.
  DecryptionFailed,
}

const DECRYPTION_FAILED: &str = "DECRYPTION_FAILED";

impl SecretDigest {
  pub fn is_failure(&self) -> bool { matches!(self, Self::DecryptionFailed) }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Digest(d) => d,
      Self::DecryptionFailed => DECRYPTION_FAILED,
    }
  }
}

impl Serialize for SecretDigest {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for SecretDigest {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let s = String::deserialize(d)?;
    Ok(if s == DECRYPTION_FAILED { Self::DecryptionFailed } else { Self::Digest(s) })
  }
}

/// One row of `list_secrets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
  #[serde(flatten)]
  pub secret: Secret,
  pub digest: SecretDigest,
}

/// Decrypted secrets for one project, materialised for a single invocation.
#[derive(Debug, Default)]
pub struct SecretSet {
  pub values: BTreeMap<String, Zeroizing<String>>,
  /// Names whose ciphertext could not be decrypted with the current key.
  pub failed: Vec<String>,
}

impl SecretSet {
  pub fn get(&self, name: &str) -> Option<&str> {
    self.values.get(name).map(|v| v.as_str())
  }
}
