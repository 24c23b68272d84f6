//! Core types and trait definitions for the Stratum tenant platform.
//!
//! This crate is deliberately free of HTTP, crypto and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod function;
pub mod ident;
pub mod invocation;
pub mod project;
pub mod secret;
pub mod store;
pub mod table;

pub use error::{Classify, Error, ErrorClass, Result};
pub use project::ProjectId;
