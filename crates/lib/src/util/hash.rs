//! Hashing utilities for asset fingerprints.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `fingerprint()`: the canonical stream fingerprint over filtered entries
//! - `hash_file()` / `hash_bytes()`: single file and arbitrary byte hashing
//! - `xor_hashes()`: combination of two digests used for BUNDLE hashes
//! - `Hashable`: hashing of serializable values through their JSON form

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::asset::filter::{EntryKind, FilteredEntry};
use crate::error::{Classify, ErrorKind};

/// Type bits mixed into each record, matching the POSIX `st_mode` layout.
const MODE_FILE: u32 = 0o100000;
const MODE_DIR: u32 = 0o040000;
const MODE_SYMLINK: u32 = 0o120000;
const MODE_OWNER_EXEC: u32 = 0o100;

/// A full 64-character SHA256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl ContentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ContentHash, serde_json::Error> {
    let serialized = serde_json::to_string(self)?;
    Ok(hash_bytes(serialized.as_bytes()))
  }
}

/// Error while fingerprinting content.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum HashError {
  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("file {path} changed while it was being hashed")]
  Changed { path: String },

  #[error("failed to serialize hash input: {message}")]
  Serialize { message: String },
}

impl Classify for HashError {
  fn kind(&self) -> ErrorKind {
    match self {
      HashError::Serialize { .. } => ErrorKind::InvalidArgument,
      _ => ErrorKind::FilesystemError,
    }
  }
}

/// Compute the canonical fingerprint of an ordered entry list.
///
/// Each entry contributes one record to a single SHA-256 stream:
///
/// ```text
/// FILE\0<rel>\0<mode>\0<len>\0<bytes>
/// DIR\0<rel>\0<mode>\0
/// SYMLINK\0<rel>\0<mode>\0<len>\0<target>
/// ```
///
/// `mode` is the octal type bits plus owner-exec. Timestamps, ownership and
/// the remaining permission bits never reach the stream, so the result only
/// changes when relative paths, contents, link targets or the exec bit do.
/// Callers must pass entries already sorted by relative path.
pub fn fingerprint(entries: &[FilteredEntry]) -> Result<ContentHash, HashError> {
  let mut hasher = Sha256::new();
  for entry in entries {
    write_record(&mut hasher, entry)?;
  }
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

fn write_header(hasher: &mut Sha256, tag: &str, rel: &str, mode: u32) {
  hasher.update(tag.as_bytes());
  hasher.update(b"\0");
  hasher.update(rel.as_bytes());
  hasher.update(b"\0");
  hasher.update(format!("{mode:o}").as_bytes());
  hasher.update(b"\0");
}

fn write_record(hasher: &mut Sha256, entry: &FilteredEntry) -> Result<(), HashError> {
  match &entry.kind {
    EntryKind::File { executable, len } => {
      let mode = MODE_FILE | if *executable { MODE_OWNER_EXEC } else { 0 };
      write_header(hasher, "FILE", &entry.rel_path, mode);
      hasher.update(len.to_string().as_bytes());
      hasher.update(b"\0");
      let streamed = stream_file(hasher, &entry.source)?;
      if streamed != *len {
        return Err(HashError::Changed {
          path: entry.source.display().to_string(),
        });
      }
    }
    EntryKind::Dir => write_header(hasher, "DIR", &entry.rel_path, MODE_DIR),
    EntryKind::Symlink { target } => {
      write_header(hasher, "SYMLINK", &entry.rel_path, MODE_SYMLINK);
      hasher.update(target.len().to_string().as_bytes());
      hasher.update(b"\0");
      hasher.update(target.as_bytes());
    }
  }
  Ok(())
}

fn stream_file(hasher: &mut Sha256, path: &Path) -> Result<u64, HashError> {
  let read_err = |e: std::io::Error| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };
  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut buffer = [0u8; 8192];
  let mut total = 0u64;

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
    total += bytes_read as u64;
  }

  Ok(total)
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let mut hasher = Sha256::new();
  stream_file(&mut hasher, path)?;
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Byte-wise XOR of two digests, re-encoded as hex.
pub fn xor_hashes(a: &ContentHash, b: &ContentHash) -> Result<ContentHash, HashError> {
  let decode = |h: &ContentHash| {
    hex::decode(h.as_str()).map_err(|e| HashError::Serialize {
      message: format!("invalid digest '{h}': {e}"),
    })
  };
  let left = decode(a)?;
  let right = decode(b)?;
  if left.len() != right.len() {
    return Err(HashError::Serialize {
      message: format!("digest lengths differ ({} vs {})", left.len(), right.len()),
    });
  }
  let mixed: Vec<u8> = left.iter().zip(right.iter()).map(|(l, r)| l ^ r).collect();
  Ok(ContentHash(hex::encode(mixed)))
}
