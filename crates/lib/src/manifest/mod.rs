//! Cloud assembly manifest types and writing.

mod types;

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

pub use types::*;

use crate::error::{Classify, ErrorKind};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("failed to write {path}: {message}")]
pub struct WriteError {
  pub path: String,
  pub message: String,
}

impl Classify for WriteError {
  fn kind(&self) -> ErrorKind {
    ErrorKind::ManifestWriteError
  }
}

/// Serialize `value` as pretty JSON with object keys sorted.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
  // serde_json's Map is ordered by key, so a round trip through Value sorts
  // struct fields too.
  let value = serde_json::to_value(value)?;
  let mut text = serde_json::to_string_pretty(&value)?;
  text.push('\n');
  Ok(text)
}

/// Write `value` to `path` through a temporary sibling and a rename.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), WriteError> {
  let err = |message: String| WriteError {
    path: path.display().to_string(),
    message,
  };
  let content = to_canonical_json(value).map_err(|e| err(e.to_string()))?;
  let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));

  let mut tmp = NamedTempFile::new_in(dir).map_err(|e| err(e.to_string()))?;
  tmp.write_all(content.as_bytes()).map_err(|e| err(e.to_string()))?;
  tmp.persist(path).map_err(|e| err(e.error.to_string()))?;
  Ok(())
}
