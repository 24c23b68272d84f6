//! Identifier validation.
//!
//! Every name that ends up interpolated into SQL (table and column names) or
//! used as a lookup key chosen by a tenant (secret names, slugs, file paths)
//! is checked here before anything touches storage.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static SECRET_NAME: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").expect("static regex"));

static SQL_IDENT: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("static regex"));

/// Longest identifier we accept for a table or column.
pub const MAX_IDENT_LEN: usize = 63;

const MAX_SECRET_NAME_LEN: usize = 255;
const MAX_FUNCTION_NAME_LEN: usize = 128;
const MAX_FILE_PATH_LEN: usize = 256;

/// Secret names are upper-case identifiers, e.g. `STRIPE_KEY`.
pub fn validate_secret_name(name: &str) -> Result<()> {
  if name.len() > MAX_SECRET_NAME_LEN || !SECRET_NAME.is_match(name) {
    return Err(Error::Validation(format!(
      "secret name {name:?} must match ^[A-Z_][A-Z0-9_]*$"
    )));
  }
  Ok(())
}

/// Table and column names are lower-case identifiers. `what` names the thing
/// being validated for the error message.
pub fn validate_sql_ident(what: &str, name: &str) -> Result<()> {
  if name.len() > MAX_IDENT_LEN || !SQL_IDENT.is_match(name) {
    return Err(Error::Validation(format!(
      "{what} {name:?} must match ^[a-z_][a-z0-9_]*$ and be at most \
       {MAX_IDENT_LEN} characters"
    )));
  }
  Ok(())
}

/// Derive a URL-safe slug from a human function name.
///
/// ASCII alphanumerics are lower-cased and kept; every other run of
/// characters collapses to a single `-`; leading and trailing dashes are
/// trimmed. An empty result is a validation error.
pub fn slugify(name: &str) -> Result<String> {
  if name.trim().is_empty() || name.len() > MAX_FUNCTION_NAME_LEN {
    return Err(Error::Validation(format!(
      "function name must be 1..={MAX_FUNCTION_NAME_LEN} characters"
    )));
  }

  let mut slug = String::with_capacity(name.len());
  let mut pending_dash = false;
  for c in name.chars() {
    if c.is_ascii_alphanumeric() {
      if pending_dash && !slug.is_empty() {
        slug.push('-');
      }
      pending_dash = false;
      slug.push(c.to_ascii_lowercase());
    } else {
      pending_dash = true;
    }
  }

  if slug.is_empty() {
    return Err(Error::Validation(format!(
      "function name {name:?} has no characters usable in a slug"
    )));
  }
  Ok(slug)
}

/// Function file paths are relative, forward-slash separated and never
/// escape the function root.
pub fn validate_file_path(path: &str) -> Result<()> {
  let bad = |why: &str| Err(Error::Validation(format!("file path {path:?} {why}")));

  if path.is_empty() || path.len() > MAX_FILE_PATH_LEN {
    return bad("must be 1..=256 characters");
  }
  if path.starts_with('/') || path.contains('\\') {
    return bad("must be relative and use '/' separators");
  }
  if path.chars().any(char::is_control) {
    return bad("must not contain control characters");
  }
  if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
    return bad("must not contain empty, '.' or '..' segments");
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn secret_names() {
    for ok in ["API_KEY", "_X", "A1", "STRIPE_SECRET_2"] {
      assert!(validate_secret_name(ok).is_ok(), "{ok}");
    }
    for bad in ["", "api_key", "1KEY", "KEY-1", "KEY 1", "Ключ"] {
      assert!(validate_secret_name(bad).is_err(), "{bad}");
    }
  }

  #[test]
  fn sql_idents() {
    assert!(validate_sql_ident("table", "orders").is_ok());
    assert!(validate_sql_ident("table", "_tmp_2").is_ok());
    assert!(validate_sql_ident("table", "Orders").is_err());
    assert!(validate_sql_ident("table", "2fast").is_err());
    assert!(validate_sql_ident("table", "a;drop table x").is_err());
    assert!(validate_sql_ident("table", &"a".repeat(64)).is_err());
  }

  #[test]
  fn slugs() {
    assert_eq!(slugify("echo").unwrap(), "echo");
    assert_eq!(slugify("  Send Welcome Email! ").unwrap(), "send-welcome-email");
    assert_eq!(slugify("a__b--c").unwrap(), "a-b-c");
    assert!(slugify("!!!").is_err());
    assert!(slugify("   ").is_err());
  }

  #[test]
  fn file_paths() {
    assert!(validate_file_path("index.js").is_ok());
    assert!(validate_file_path("lib/util.js").is_ok());
    assert!(validate_file_path("/etc/passwd").is_err());
    assert!(validate_file_path("../x.js").is_err());
    assert!(validate_file_path("lib//x.js").is_err());
    assert!(validate_file_path("lib\\x.js").is_err());
  }
}
