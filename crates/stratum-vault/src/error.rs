//! Error type for `stratum-vault`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("service secret must not be empty")]
  EmptyServiceSecret,

  #[error("key derivation failed: {0}")]
  KeyDerivation(String),

  #[error("encryption failed")]
  Encrypt,

  /// Wrong key, wrong associated data, or tampered ciphertext. AEAD does not
  /// distinguish between them.
  #[error("decryption failed")]
  Decrypt,

  #[error("malformed sealed value: {0}")]
  Encoding(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
