//! Invocation request and outcome types.
//!
//! Nothing here is persisted. An invocation lives exactly as long as the
//! call that produced it.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The caller-supplied half of an invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invocation {
  #[serde(default)]
  pub payload: Value,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub method:  Option<String>,
}

impl Invocation {
  pub fn with_payload(payload: Value) -> Self {
    Self { payload, ..Self::default() }
  }
}

/// Lifecycle of one invocation. `Succeeded`, `Failed` and `TimedOut` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
  Pending,
  Loading,
  Executing,
  Succeeded,
  Failed(ErrorKind),
  TimedOut,
}

impl InvocationState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed(_) | Self::TimedOut)
  }
}

/// Why an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  NotFound,
  ValidationError,
  ExecutionError,
  TimedOut,
  LoadFailure,
  Internal,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::NotFound => "not_found",
      Self::ValidationError => "validation_error",
      Self::ExecutionError => "execution_error",
      Self::TimedOut => "timed_out",
      Self::LoadFailure => "load_failure",
      Self::Internal => "internal",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
  pub kind:    ErrorKind,
  pub message: String,
}

impl InvocationError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self { kind, message: message.into() }
  }
}

/// Result of `Runtime::invoke`. Logs are present on both arms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationOutcome {
  #[serde(rename_all = "camelCase")]
  Success {
    result:            Value,
    logs:              Vec<String>,
    execution_time_ms: u64,
  },
  #[serde(rename_all = "camelCase")]
  Failure {
    error:             InvocationError,
    logs:              Vec<String>,
    execution_time_ms: u64,
  },
}

impl InvocationOutcome {
  pub fn logs(&self) -> &[String] {
    match self {
      Self::Success { logs, .. } | Self::Failure { logs, .. } => logs,
    }
  }

  pub fn execution_time_ms(&self) -> u64 {
    match self {
      Self::Success { execution_time_ms, .. } | Self::Failure { execution_time_ms, .. } => {
        *execution_time_ms
      }
    }
  }

  pub fn error(&self) -> Option<&InvocationError> {
    match self {
      Self::Failure { error, .. } => Some(error),
      Self::Success { .. } => None,
    }
  }

  pub fn result(&self) -> Option<&Value> {
    match self {
      Self::Success { result, .. } => Some(result),
      Self::Failure { .. } => None,
    }
  }

  /// The terminal state this outcome corresponds to.
  pub fn state(&self) -> InvocationState {
    match self.error() {
      None => InvocationState::Succeeded,
      Some(e) if e.kind == ErrorKind::TimedOut => InvocationState::TimedOut,
      Some(e) => InvocationState::Failed(e.kind),
    }
  }
}
