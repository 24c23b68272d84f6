//! Per-project key derivation and secret sealing.
//!
//! A project's key is `argon2id(service_secret, project_salt)`. It is derived
//! on demand for each operation and dropped (zeroized) afterwards; nothing in
//! this crate caches keys or touches storage. Rotating a project's salt
//! therefore invalidates every value sealed under the old one at once.
//!
//! Sealed values are AES-256-GCM with a random 96-bit nonce, encoded as
//! `v1:` followed by base64 of `nonce || ciphertext || tag`. Callers bind
//! each value to its owner through the associated data.

pub mod error;

use std::fmt;

use aes_gcm::{
  Aes256Gcm, Nonce,
  aead::{Aead, KeyInit, Payload},
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use rand_core::{OsRng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub use error::{Error, Result};

/// Length of a project salt in bytes.
pub const SALT_LEN: usize = 16;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SEALED_PREFIX: &str = "v1:";

// ─── Parameters ──────────────────────────────────────────────────────────────

/// Argon2id cost parameters. Defaults match the argon2 crate's defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KdfParams {
  pub memory_kib: u32,
  pub iterations: u32,
  pub lanes:      u32,
}

impl Default for KdfParams {
  fn default() -> Self {
    Self {
      memory_kib: Params::DEFAULT_M_COST,
      iterations: Params::DEFAULT_T_COST,
      lanes:      Params::DEFAULT_P_COST,
    }
  }
}

impl KdfParams {
  /// The cheapest parameters argon2 accepts. Only for tests.
  pub fn insecure_fast() -> Self { Self { memory_kib: 8, iterations: 1, lanes: 1 } }
}

// ─── Vault ───────────────────────────────────────────────────────────────────

/// Holds the service-wide secret and derives per-project keys from it.
#[derive(Clone)]
pub struct Vault {
  service_secret: Zeroizing<Vec<u8>>,
  params:         KdfParams,
}

impl fmt::Debug for Vault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Vault")
      .field("service_secret", &"<redacted>")
      .field("params", &self.params)
      .finish()
  }
}

impl Vault {
  pub fn new(service_secret: impl Into<Vec<u8>>, params: KdfParams) -> Result<Self> {
    let service_secret = Zeroizing::new(service_secret.into());
    if service_secret.is_empty() {
      return Err(Error::EmptyServiceSecret);
    }
    // Surface bad cost parameters at startup rather than on first use.
    build_params(params)?;
    Ok(Self { service_secret, params })
  }

  /// A fresh random salt for a project that has none yet.
  pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
  }

  /// Derive the symmetric key for the project owning `salt`.
  pub fn derive_key(&self, salt: &[u8]) -> Result<ProjectKey> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, build_params(self.params)?);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
      .hash_password_into(&self.service_secret, salt, key.as_mut_slice())
      .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(ProjectKey { key })
  }
}

fn build_params(p: KdfParams) -> Result<Params> {
  Params::new(p.memory_kib, p.iterations, p.lanes, Some(KEY_LEN))
    .map_err(|e| Error::KeyDerivation(e.to_string()))
}

// ─── Project key ─────────────────────────────────────────────────────────────

/// A derived key, alive for the duration of one request.
pub struct ProjectKey {
  key: Zeroizing<[u8; KEY_LEN]>,
}

impl ProjectKey {
  fn cipher(&self) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(self.key.as_slice()).map_err(|_| Error::Encrypt)
  }

  /// Encrypt `plaintext`, binding it to `aad`.
  pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = self
      .cipher()?
      .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
      .map_err(|_| Error::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(format!("{SEALED_PREFIX}{}", B64.encode(out)))
  }

  /// Decrypt a value produced by [`ProjectKey::seal`] under the same key and
  /// associated data.
  pub fn open(&self, sealed: &str, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let encoded = sealed
      .strip_prefix(SEALED_PREFIX)
      .ok_or_else(|| Error::Encoding("unknown format version".into()))?;
    let bytes = B64
      .decode(encoded)
      .map_err(|e| Error::Encoding(e.to_string()))?;
    if bytes.len() < NONCE_LEN {
      return Err(Error::Encoding("sealed value too short".into()));
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    self
      .cipher()?
      .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
      .map(Zeroizing::new)
      .map_err(|_| Error::Decrypt)
  }

  /// Like [`ProjectKey::open`] but requires UTF-8 plaintext.
  pub fn open_string(&self, sealed: &str, aad: &[u8]) -> Result<Zeroizing<String>> {
    let bytes = self.open(sealed, aad)?;
    String::from_utf8(bytes.to_vec())
      .map(Zeroizing::new)
      .map_err(|_| Error::Decrypt)
  }
}

/// Non-reversible display digest of a secret value: SHA-256, lowercase hex.
pub fn digest(plaintext: &[u8]) -> String { hex::encode(Sha256::digest(plaintext)) }

#[cfg(test)]
mod tests {
  use super::*;

  fn vault() -> Vault { Vault::new("service-secret", KdfParams::insecure_fast()).unwrap() }

  #[test]
  fn seal_then_open() {
    let key = vault().derive_key(&[7u8; SALT_LEN]).unwrap();
    let sealed = key.seal(b"hunter2", b"proj-a/API_KEY").unwrap();
    assert!(sealed.starts_with("v1:"));
    assert!(!sealed.contains("hunter2"));
    assert_eq!(
      key.open_string(&sealed, b"proj-a/API_KEY").unwrap().as_str(),
      "hunter2"
    );
  }

  #[test]
  fn same_salt_derives_same_key() {
    let v = vault();
    let salt = Vault::generate_salt();
    let sealed = v.derive_key(&salt).unwrap().seal(b"x", b"").unwrap();
    assert!(v.derive_key(&salt).unwrap().open(&sealed, b"").is_ok());
  }

  #[test]
  fn other_project_key_cannot_open() {
    let v = vault();
    let a = v.derive_key(&Vault::generate_salt()).unwrap();
    let b = v.derive_key(&Vault::generate_salt()).unwrap();
    let sealed = a.seal(b"only for a", b"aad").unwrap();
    assert!(matches!(b.open(&sealed, b"aad"), Err(Error::Decrypt)));
  }

  #[test]
  fn different_service_secret_cannot_open() {
    let salt = Vault::generate_salt();
    let sealed = vault().derive_key(&salt).unwrap().seal(b"v", b"").unwrap();
    let other = Vault::new("another-secret", KdfParams::insecure_fast()).unwrap();
    assert!(other.derive_key(&salt).unwrap().open(&sealed, b"").is_err());
  }

  #[test]
  fn associated_data_is_bound() {
    let key = vault().derive_key(&[1u8; SALT_LEN]).unwrap();
    let sealed = key.seal(b"v", b"proj/A").unwrap();
    assert!(matches!(key.open(&sealed, b"proj/B"), Err(Error::Decrypt)));
  }

  #[test]
  fn tampering_is_detected() {
    let key = vault().derive_key(&[2u8; SALT_LEN]).unwrap();
    let sealed = key.seal(b"value", b"").unwrap();
    let mut raw = B64.decode(&sealed[3..]).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    let forged = format!("v1:{}", B64.encode(raw));
    assert!(matches!(key.open(&forged, b""), Err(Error::Decrypt)));
    assert!(matches!(key.open("v0:abc", b""), Err(Error::Encoding(_))));
  }

  #[test]
  fn rejects_empty_service_secret_and_bad_params() {
    assert!(matches!(
      Vault::new("", KdfParams::default()),
      Err(Error::EmptyServiceSecret)
    ));
    let bad = KdfParams { memory_kib: 1, iterations: 1, lanes: 1 };
    assert!(matches!(Vault::new("s", bad), Err(Error::KeyDerivation(_))));
  }

  #[test]
  fn digest_is_hex_sha256() {
    assert_eq!(
      digest(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
  }

  #[test]
  fn debug_redacts_service_secret() {
    let shown = format!("{:?}", vault());
    assert!(!shown.contains("service-secret"));
  }
}
