//! Error type for `stratum-store-sqlite`.

use rusqlite::ErrorCode;
use stratum_core::{Classify, ErrorClass};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  Core(#[from] stratum_core::Error),

  #[error("vault error: {0}")]
  Vault(#[from] stratum_vault::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  /// A tenant statement tried to reach something outside its namespace.
  #[error("permission denied: {0}")]
  PermissionDenied(String),

  /// A tenant statement ran past its timeout or its caller went away.
  #[error("statement interrupted: {0}")]
  Interrupted(String),
}

impl Error {
  /// Whether this error should be reported to the caller as a bad request.
  pub fn is_validation(&self) -> bool {
    matches!(self, Error::Core(stratum_core::Error::Validation(_)))
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Error::Core(stratum_core::Error::NotFound(_)))
  }
}

impl Classify for Error {
  fn class(&self) -> ErrorClass {
    match self {
      Error::Core(e) => e.class(),
      Error::PermissionDenied(_) => ErrorClass::PermissionDenied,
      _ => ErrorClass::Internal,
    }
  }
}

impl From<tokio_rusqlite::Error> for Error {
  /// Authorizer denials and progress-handler interrupts surface from SQLite
  /// as plain errors; lift them into their own variants so callers can tell
  /// them apart.
  fn from(e: tokio_rusqlite::Error) -> Self {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, msg)) = &e {
      match code.code {
        ErrorCode::AuthorizationForStatementDenied => {
          return Error::PermissionDenied(msg.clone().unwrap_or_else(|| "not authorized".into()));
        }
        ErrorCode::OperationInterrupted => {
          return Error::Interrupted(msg.clone().unwrap_or_else(|| "interrupted".into()));
        }
        _ => {}
      }
    }
    Error::Database(e)
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { tokio_rusqlite::Error::Rusqlite(e).into() }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
