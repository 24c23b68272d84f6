//! Sandboxed execution of tenant functions.
//!
//! Every invocation gets a brand-new V8 isolate on its own OS thread. The
//! isolate sees only what the prelude hands it: the event, a console that
//! writes to a per-invocation log buffer, a `db` handle pinned to the
//! project's tables, a frozen `secrets` object, `require` over the function's
//! own files, and clamped timers.

mod bridge;
mod logs;
mod ops;
mod runtime;
mod worker;

pub mod config;
pub mod error;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use runtime::Runtime;

#[cfg(test)]
mod tests;
