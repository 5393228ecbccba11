//! Error-kind taxonomy and user-visible diagnostics.
//!
//! Each module owns its own `thiserror` enum. They all implement [`Classify`]
//! so callers can group failures by [`ErrorKind`] and render a
//! [`Diagnostic`] with a remediation hint.

use std::fmt;

use serde::Serialize;

/// The kinds of failure a synthesis run can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
  DuplicateChildId,
  InvalidArgument,
  SymlinkPolicyViolation,
  FilesystemError,
  HashMismatch,
  BundlingFailed,
  ContainerRuntimeMissing,
  TokenUnresolved,
  ManifestWriteError,
  Cancelled,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::DuplicateChildId => "DuplicateChildId",
      Self::InvalidArgument => "InvalidArgument",
      Self::SymlinkPolicyViolation => "SymlinkPolicyViolation",
      Self::FilesystemError => "FilesystemError",
      Self::HashMismatch => "HashMismatch",
      Self::BundlingFailed => "BundlingFailed",
      Self::ContainerRuntimeMissing => "ContainerRuntimeMissing",
      Self::TokenUnresolved => "TokenUnresolved",
      Self::ManifestWriteError => "ManifestWriteError",
      Self::Cancelled => "Cancelled",
    }
  }

  /// Default remediation text for this kind.
  pub fn hint(&self) -> &'static str {
    match self {
      Self::DuplicateChildId => "Choose an id that is unique among the scope's children.",
      Self::InvalidArgument => "Check the construct properties passed at this path.",
      Self::SymlinkPolicyViolation => {
        "Change the symlink follow mode or remove the offending link from the asset source."
      }
      Self::FilesystemError => "Check that the path exists and is readable, and that the output directory is writable.",
      Self::HashMismatch => {
        "The staged content differs from what was committed under the same custom hash.\n\
         Change the custom hash whenever the asset content changes."
      }
      Self::BundlingFailed => "Inspect the bundling output above and fix the bundling command or image.",
      Self::ContainerRuntimeMissing => {
        "Install a container runtime or point CDK_DOCKER at a compatible program."
      }
      Self::TokenUnresolved => "A token refers to a value that does not exist in this stack.",
      Self::ManifestWriteError => "Check that the output directory is writable.",
      Self::Cancelled => "The run was cancelled; no partial outputs were committed.",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Maps a module error onto the shared taxonomy.
pub trait Classify {
  fn kind(&self) -> ErrorKind;

  fn hint(&self) -> &'static str {
    self.kind().hint()
  }
}

/// A rendered failure attributed to a construct path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
  pub path: String,
  pub kind: ErrorKind,
  pub message: String,
  pub hint: String,
}

impl Diagnostic {
  pub fn new<E>(path: impl Into<String>, err: &E) -> Self
  where
    E: Classify + fmt::Display,
  {
    Self {
      path: path.into(),
      kind: err.kind(),
      message: err.to_string(),
      hint: err.hint().to_string(),
    }
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let path = if self.path.is_empty() { "/" } else { self.path.as_str() };
    write!(f, "error[{}] at {}: {}", self.kind, path, self.message)?;
    if !self.hint.is_empty() {
      write!(f, "\nhint: {}", self.hint)?;
    }
    Ok(())
  }
}
