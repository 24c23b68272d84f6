//! Errors raised while setting the runtime up.
//!
//! Failures of an individual invocation are not errors in this sense; they
//! are reported as data in [`stratum_core::invocation::InvocationOutcome`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid runtime configuration: {0}")]
  Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
