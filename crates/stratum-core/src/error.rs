//! Error taxonomy shared by every Stratum crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Bad identifier, name, type or shape. Raised before any side effect.
  #[error("validation error: {0}")]
  Validation(String),

  #[error("not found: {0}")]
  NotFound(String),

  /// No or invalid project identity. Produced upstream, propagated here.
  #[error("unauthorized")]
  Unauthorized,

  /// A single secret could not be decrypted. Never fatal to a bulk read.
  #[error("decryption failed: {0}")]
  DecryptionFailure(String),

  #[error("invocation timed out")]
  TimedOut,

  /// The tenant program threw or rejected.
  #[error("execution error: {0}")]
  Execution(String),

  /// A table exists without a registry row, or the reverse.
  #[error("registry inconsistency: {0}")]
  RegistryInconsistency(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse class of a backend error, as far as callers need to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  Validation,
  NotFound,
  Unauthorized,
  PermissionDenied,
  Internal,
}

/// Implemented by store error types so transport layers can pick a response
/// without knowing the backend.
pub trait Classify {
  fn class(&self) -> ErrorClass;
}

impl Classify for Error {
  fn class(&self) -> ErrorClass {
    match self {
      Error::Validation(_) => ErrorClass::Validation,
      Error::NotFound(_) => ErrorClass::NotFound,
      Error::Unauthorized => ErrorClass::Unauthorized,
      _ => ErrorClass::Internal,
    }
  }
}
