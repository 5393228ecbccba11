//! Committing prepared content into the staging root.
//!
//! Every staged object is named after its asset hash (`asset.<hash>.zip`,
//! `asset.<hash>` or `asset.<hash>.<ext>`), built under a temporary name in
//! the staging root and renamed into place. The rename never replaces an
//! existing object: when two writers race for the same hash, the first one
//! wins and the loser discards its temporary copy. An existing object is
//! reused without copying.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use super::filter::{EntryKind, FilterError, FilterOptions, FilteredEntry, collect};
use crate::cancel::CancelSignal;
use crate::consts::STAGED_ASSET_PREFIX;
use crate::error::{Classify, ErrorKind};
use crate::util::hash::{HashError, fingerprint, hash_file};

const TEMP_PREFIX: &str = ".staging-";

/// How directory content is committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryPackaging {
  /// A deterministic zip archive.
  #[default]
  Zip,
  /// A plain directory copy.
  Copy,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StageError {
  #[error("failed to stage {path}: {message}")]
  Io { path: String, message: String },

  #[error("failed to write archive {path}: {message}")]
  Zip { path: String, message: String },

  #[error("content staged as {path} does not match the content previously committed under hash {hash}")]
  HashMismatch { hash: String, path: String },

  #[error("staging was cancelled")]
  Cancelled,

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Filter(#[from] FilterError),
}

impl Classify for StageError {
  fn kind(&self) -> ErrorKind {
    match self {
      StageError::Io { .. } | StageError::Zip { .. } => ErrorKind::FilesystemError,
      StageError::HashMismatch { .. } => ErrorKind::HashMismatch,
      StageError::Cancelled => ErrorKind::Cancelled,
      StageError::Hash(e) => e.kind(),
      StageError::Filter(e) => e.kind(),
    }
  }
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> StageError {
  StageError::Io {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

/// A committed (or reused) staged object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
  pub path: PathBuf,
  pub file_name: String,
  pub cached: bool,
}

/// Name of the staged object for a directory.
pub fn tree_file_name(hash: &str, packaging: DirectoryPackaging) -> String {
  match packaging {
    DirectoryPackaging::Zip => format!("{STAGED_ASSET_PREFIX}{hash}.zip"),
    DirectoryPackaging::Copy => format!("{STAGED_ASSET_PREFIX}{hash}"),
  }
}

/// Name of the staged object for a single file, keeping its extension.
pub fn file_file_name(hash: &str, source: &Path) -> String {
  match source.extension().and_then(|e| e.to_str()) {
    Some(ext) => format!("{STAGED_ASSET_PREFIX}{hash}.{ext}"),
    None => format!("{STAGED_ASSET_PREFIX}{hash}"),
  }
}

/// Commit the filtered `entries` under `root`.
///
/// With `verify`, an existing object is rebuilt in a temporary location and
/// compared; a difference is a [`StageError::HashMismatch`].
pub fn stage_tree(
  root: &Path,
  hash: &str,
  entries: &[FilteredEntry],
  packaging: DirectoryPackaging,
  verify: bool,
  cancel: &CancelSignal,
) -> Result<Staged, StageError> {
  let file_name = tree_file_name(hash, packaging);
  let target = root.join(&file_name);

  if target.exists() && !verify {
    debug!(path = %target.display(), "asset already staged");
    return Ok(Staged {
      path: target,
      file_name,
      cached: true,
    });
  }

  let cached = match packaging {
    DirectoryPackaging::Zip => {
      let mut tmp = temp_file(root)?;
      write_zip(tmp.as_file_mut(), entries, cancel).map_err(|e| e.at(&target))?;
      publish_file(tmp, &target, hash, verify)?
    }
    DirectoryPackaging::Copy => {
      let tmp = Builder::new().prefix(TEMP_PREFIX).tempdir_in(root).map_err(|e| io_err(root, e))?;
      copy_entries(tmp.path(), entries, cancel)?;
      publish_dir(tmp, &target, hash, verify)?
    }
  };

  if !cached {
    info!(path = %target.display(), entries = entries.len(), "staged asset");
  }
  Ok(Staged {
    path: target,
    file_name,
    cached,
  })
}

/// Commit a single file under `root` as `asset.<hash>.<ext>`.
pub fn stage_file(root: &Path, hash: &str, source: &Path, verify: bool) -> Result<Staged, StageError> {
  let file_name = file_file_name(hash, source);
  let target = root.join(&file_name);

  if target.exists() && !verify {
    debug!(path = %target.display(), "asset already staged");
    return Ok(Staged {
      path: target,
      file_name,
      cached: true,
    });
  }

  let mut tmp = temp_file(root)?;
  let mut input = File::open(source).map_err(|e| io_err(source, e))?;
  io::copy(&mut input, tmp.as_file_mut()).map_err(|e| io_err(source, e))?;
  let cached = publish_file(tmp, &target, hash, verify)?;

  if !cached {
    info!(path = %target.display(), "staged asset");
  }
  Ok(Staged {
    path: target,
    file_name,
    cached,
  })
}

fn temp_file(root: &Path) -> Result<NamedTempFile, StageError> {
  Builder::new()
    .prefix(TEMP_PREFIX)
    .suffix(".tmp")
    .tempfile_in(root)
    .map_err(|e| io_err(root, e))
}

/// Rename `tmp` to `target` unless it exists. Returns whether an existing
/// object was kept.
fn publish_file(tmp: NamedTempFile, target: &Path, hash: &str, verify: bool) -> Result<bool, StageError> {
  match tmp.persist_noclobber(target) {
    Ok(_) => Ok(false),
    Err(e) if target.exists() => {
      if verify && hash_file(e.file.path())? != hash_file(target)? {
        return Err(StageError::HashMismatch {
          hash: hash.to_string(),
          path: target.display().to_string(),
        });
      }
      debug!(path = %target.display(), "another writer staged this asset first");
      Ok(true)
    }
    Err(e) => Err(io_err(target, e.error)),
  }
}

fn publish_dir(tmp: TempDir, target: &Path, hash: &str, verify: bool) -> Result<bool, StageError> {
  if !target.exists() {
    match fs::rename(tmp.path(), target) {
      Ok(()) => return Ok(false),
      Err(e) if !target.exists() => return Err(io_err(target, e)),
      Err(_) => {}
    }
  }
  if verify {
    let staged = fingerprint(&collect(target, &FilterOptions::default(), None)?)?;
    let fresh = fingerprint(&collect(tmp.path(), &FilterOptions::default(), None)?)?;
    if staged != fresh {
      return Err(StageError::HashMismatch {
        hash: hash.to_string(),
        path: target.display().to_string(),
      });
    }
  }
  debug!(path = %target.display(), "another writer staged this asset first");
  Ok(true)
}

enum WriteError {
  Io(io::Error),
  Zip(zip::result::ZipError),
  Cancelled,
}

impl From<io::Error> for WriteError {
  fn from(e: io::Error) -> Self {
    WriteError::Io(e)
  }
}

impl From<zip::result::ZipError> for WriteError {
  fn from(e: zip::result::ZipError) -> Self {
    WriteError::Zip(e)
  }
}

impl WriteError {
  fn at(self, path: &Path) -> StageError {
    match self {
      WriteError::Io(e) => io_err(path, e),
      WriteError::Zip(e) => StageError::Zip {
        path: path.display().to_string(),
        message: e.to_string(),
      },
      WriteError::Cancelled => StageError::Cancelled,
    }
  }
}

fn zip_options(mode: u32) -> SimpleFileOptions {
  SimpleFileOptions::default()
    .compression_method(CompressionMethod::Deflated)
    .last_modified_time(DateTime::default())
    .unix_permissions(mode)
}

/// Write a deterministic archive: entries in the given order, a fixed
/// timestamp and normalized permissions. Directories get an entry only when
/// nothing else in the archive implies them, so empty ones survive.
fn write_zip<W: Write + Seek>(writer: W, entries: &[FilteredEntry], cancel: &CancelSignal) -> Result<(), WriteError> {
  let parents: HashSet<&str> = entries
    .iter()
    .filter_map(|e| e.rel_path.rsplit_once('/').map(|(parent, _)| parent))
    .collect();
  let mut zip = ZipWriter::new(writer);
  for entry in entries {
    if cancel.is_cancelled() {
      return Err(WriteError::Cancelled);
    }
    match &entry.kind {
      EntryKind::Dir if parents.contains(entry.rel_path.as_str()) => {}
      EntryKind::Dir => zip.add_directory(entry.rel_path.as_str(), zip_options(0o755))?,
      EntryKind::File { executable, .. } => {
        let mode = if *executable { 0o755 } else { 0o644 };
        zip.start_file(entry.rel_path.as_str(), zip_options(mode))?;
        let mut input = File::open(&entry.source)?;
        io::copy(&mut input, &mut zip)?;
      }
      EntryKind::Symlink { target } => {
        zip.add_symlink(entry.rel_path.as_str(), target.as_str(), zip_options(0o777))?;
      }
    }
  }
  zip.finish()?;
  Ok(())
}

fn copy_entries(dest: &Path, entries: &[FilteredEntry], cancel: &CancelSignal) -> Result<(), StageError> {
  for entry in entries {
    if cancel.is_cancelled() {
      return Err(StageError::Cancelled);
    }
    let to = dest.join(&entry.rel_path);
    if let Some(parent) = to.parent() {
      fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    match &entry.kind {
      EntryKind::Dir => fs::create_dir_all(&to).map_err(|e| io_err(&to, e))?,
      EntryKind::File { executable, .. } => {
        fs::copy(&entry.source, &to).map_err(|e| io_err(&entry.source, e))?;
        set_mode(&to, *executable)?;
      }
      EntryKind::Symlink { target } => make_symlink(Path::new(target), &to)?,
    }
  }
  Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, executable: bool) -> Result<(), StageError> {
  use std::os::unix::fs::PermissionsExt;
  let mode = if executable { 0o755 } else { 0o644 };
  fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _executable: bool) -> Result<(), StageError> {
  Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<(), StageError> {
  std::os::unix::fs::symlink(target, link).map_err(|e| io_err(link, e))
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> Result<(), StageError> {
  std::os::windows::fs::symlink_file(target, link).map_err(|e| io_err(link, e))
}
