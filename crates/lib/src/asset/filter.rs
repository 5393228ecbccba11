//! Source tree filtering.
//!
//! Walks an asset source, applies exclusion patterns under one of three
//! ignore dialects and the symlink follow policy, and yields the entries in
//! lexicographic order of their `/`-separated relative paths. The same entry
//! list feeds both the fingerprint and the staged copy, so anything excluded
//! here is absent from both.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Classify, ErrorKind};

/// How symbolic links inside an asset source are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymlinkFollowMode {
  /// Record links as links.
  #[default]
  Never,
  /// Follow every link.
  Always,
  /// Follow links whose target lies outside the source.
  External,
  /// Follow internal links; a link escaping the source is an error.
  BlockExternal,
}

/// Which pattern dialect exclusions are written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IgnoreMode {
  #[default]
  Glob,
  Git,
  Docker,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("unknown {what} '{value}' (expected one of: {expected})")]
pub struct ParseModeError {
  pub what: &'static str,
  pub value: String,
  pub expected: &'static str,
}

impl FromStr for SymlinkFollowMode {
  type Err = ParseModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().replace('-', "_").as_str() {
      "never" => Ok(Self::Never),
      "always" => Ok(Self::Always),
      "external" => Ok(Self::External),
      "block_external" => Ok(Self::BlockExternal),
      _ => Err(ParseModeError {
        what: "symlink follow mode",
        value: s.to_string(),
        expected: "never, always, external, block_external",
      }),
    }
  }
}

impl FromStr for IgnoreMode {
  type Err = ParseModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "glob" => Ok(Self::Glob),
      "git" => Ok(Self::Git),
      "docker" => Ok(Self::Docker),
      _ => Err(ParseModeError {
        what: "ignore mode",
        value: s.to_string(),
        expected: "glob, git, docker",
      }),
    }
  }
}

/// Filtering knobs for one asset source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterOptions {
  pub exclude: Vec<String>,
  pub follow: SymlinkFollowMode,
  pub ignore_mode: IgnoreMode,
}

/// What a filtered entry is, after the follow policy was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
  File { executable: bool, len: u64 },
  Dir,
  Symlink { target: String },
}

/// One surviving entry of a filtered walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredEntry {
  /// Relative path with `/` separators. For a single-file source, the file name.
  pub rel_path: String,
  /// Where the content lives on disk (the link target for followed links).
  pub source: PathBuf,
  pub kind: EntryKind,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
  #[error("asset source does not exist: {path}")]
  Missing { path: String },

  #[error("invalid exclude pattern '{pattern}': {message}")]
  InvalidPattern { pattern: String, message: String },

  #[error("symlink {path} points outside the asset source (to {target})")]
  ExternalSymlink { path: String, target: String },

  #[error("symlink loop detected at {path} (to {target})")]
  SymlinkLoop { path: String, target: String },

  #[error("failed to read {path}: {message}")]
  Io { path: String, message: String },
}

impl Classify for FilterError {
  fn kind(&self) -> ErrorKind {
    match self {
      FilterError::Missing { .. } | FilterError::InvalidPattern { .. } => ErrorKind::InvalidArgument,
      FilterError::ExternalSymlink { .. } | FilterError::SymlinkLoop { .. } => ErrorKind::SymlinkPolicyViolation,
      FilterError::Io { .. } => ErrorKind::FilesystemError,
    }
  }
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> FilterError {
  FilterError::Io {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

/// Compiled exclusion patterns in one dialect.
#[derive(Debug)]
pub struct IgnoreStrategy {
  mode: IgnoreMode,
  matcher: Gitignore,
  has_negation: bool,
}

impl IgnoreStrategy {
  pub fn new(root: &Path, mode: IgnoreMode, patterns: &[String]) -> Result<Self, FilterError> {
    let mut builder = GitignoreBuilder::new(root);
    let mut has_negation = false;

    for pattern in patterns {
      let trimmed = pattern.trim();
      if trimmed.is_empty() || trimmed.starts_with('#') {
        continue;
      }
      let line = match mode {
        IgnoreMode::Docker => docker_to_gitignore(trimmed),
        IgnoreMode::Glob | IgnoreMode::Git => trimmed.to_string(),
      };
      has_negation |= line.starts_with('!');
      builder.add_line(None, &line).map_err(|e| FilterError::InvalidPattern {
        pattern: pattern.clone(),
        message: e.to_string(),
      })?;
    }

    let matcher = builder.build().map_err(|e| FilterError::InvalidPattern {
      pattern: patterns.join(", "),
      message: e.to_string(),
    })?;

    Ok(Self {
      mode,
      matcher,
      has_negation,
    })
  }

  /// Whether `rel` (relative to the source root) is excluded.
  pub fn ignores(&self, rel: &Path, is_dir: bool) -> bool {
    match self.mode {
      IgnoreMode::Git => self.matcher.matched_path_or_any_parents(rel, is_dir).is_ignore(),
      // The path itself and then its ancestors, nearest first. A whitelist
      // match on the path re-includes it even under an excluded directory.
      IgnoreMode::Glob | IgnoreMode::Docker => {
        let mut current = Some(rel);
        let mut as_dir = is_dir;
        while let Some(path) = current {
          match self.matcher.matched(path, as_dir) {
            Match::Ignore(_) => return true,
            Match::Whitelist(_) => return false,
            Match::None => {}
          }
          current = path.parent().filter(|p| !p.as_os_str().is_empty());
          as_dir = true;
        }
        false
      }
    }
  }

  /// Whether an excluded directory can be skipped wholesale.
  fn prunes(&self) -> bool {
    self.mode == IgnoreMode::Git || !self.has_negation
  }
}

/// Docker patterns are anchored at the context root and may carry a leading `/`.
fn docker_to_gitignore(pattern: &str) -> String {
  let (negate, body) = match pattern.strip_prefix('!') {
    Some(rest) => ("!", rest.trim()),
    None => ("", pattern),
  };
  let body = body.trim_start_matches("./").trim_start_matches('/');
  format!("{negate}/{body}")
}

/// Walk `root` and return every entry surviving `options`, sorted by relative path.
///
/// `skip` names a directory (typically the staging root) that is never
/// descended into, even when it lies inside `root`.
pub fn collect(root: &Path, options: &FilterOptions, skip: Option<&Path>) -> Result<Vec<FilteredEntry>, FilterError> {
  let meta = fs::metadata(root).map_err(|e| match e.kind() {
    std::io::ErrorKind::NotFound => FilterError::Missing {
      path: root.display().to_string(),
    },
    _ => io_err(root, e),
  })?;

  if meta.is_file() {
    let name = root
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or_else(|| io_err(root, "path has no file name"))?;
    return Ok(vec![FilteredEntry {
      rel_path: name,
      source: root.to_path_buf(),
      kind: file_kind(&meta),
    }]);
  }

  let root_canon = dunce::canonicalize(root).map_err(|e| io_err(root, e))?;
  let strategy = IgnoreStrategy::new(&root_canon, options.ignore_mode, &options.exclude)?;
  let skip = skip.and_then(|p| dunce::canonicalize(p).ok());

  let mut walker = Walker {
    root: root_canon.clone(),
    strategy,
    follow: options.follow,
    skip,
    entries: Vec::new(),
  };
  let mut chain = vec![root_canon.clone()];
  walker.walk(&root_canon, "", &mut chain)?;

  let mut entries = walker.entries;
  entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
  debug!(root = %root.display(), entries = entries.len(), "filtered asset source");
  Ok(entries)
}

struct Walker {
  root: PathBuf,
  strategy: IgnoreStrategy,
  follow: SymlinkFollowMode,
  skip: Option<PathBuf>,
  entries: Vec<FilteredEntry>,
}

impl Walker {
  fn walk(&mut self, dir: &Path, prefix: &str, chain: &mut Vec<PathBuf>) -> Result<(), FilterError> {
    let mut it = WalkDir::new(dir).min_depth(1).follow_links(false).sort_by_file_name().into_iter();

    while let Some(entry) = it.next() {
      let entry = entry.map_err(|e| {
        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
        io_err(&path, e)
      })?;
      let rel = join_rel(prefix, entry.path().strip_prefix(dir).unwrap_or(entry.path()));
      let file_type = entry.file_type();

      if file_type.is_dir() {
        if self.is_skipped(entry.path()) {
          it.skip_current_dir();
          continue;
        }
        if self.strategy.ignores(Path::new(&rel), true) {
          if self.strategy.prunes() {
            it.skip_current_dir();
          }
          continue;
        }
        self.push(rel, entry.path().to_path_buf(), EntryKind::Dir);
      } else if file_type.is_symlink() {
        self.visit_symlink(entry.path(), rel, chain)?;
      } else if file_type.is_file() {
        if self.strategy.ignores(Path::new(&rel), false) {
          continue;
        }
        let meta = entry.metadata().map_err(|e| io_err(entry.path(), e))?;
        self.push(rel, entry.path().to_path_buf(), file_kind(&meta));
      } else {
        debug!(path = %entry.path().display(), "skipping special file");
      }
    }
    Ok(())
  }

  fn visit_symlink(&mut self, link: &Path, rel: String, chain: &mut Vec<PathBuf>) -> Result<(), FilterError> {
    let target = fs::read_link(link).map_err(|e| io_err(link, e))?;
    let parent = link.parent().unwrap_or(link);
    let resolved = dunce::canonicalize(parent.join(&target)).ok();
    let external = match &resolved {
      Some(path) => !path.starts_with(&self.root),
      None => !normalize_lexically(&parent.join(&target)).starts_with(&self.root),
    };

    let follow = match self.follow {
      SymlinkFollowMode::Never => false,
      SymlinkFollowMode::Always => true,
      SymlinkFollowMode::External => external,
      SymlinkFollowMode::BlockExternal => {
        if external {
          return Err(FilterError::ExternalSymlink {
            path: link.display().to_string(),
            target: target.display().to_string(),
          });
        }
        true
      }
    };

    let Some(resolved) = resolved.filter(|_| follow) else {
      if self.strategy.ignores(Path::new(&rel), false) {
        return Ok(());
      }
      let target = target.to_string_lossy().replace('\\', "/");
      self.push(rel, link.to_path_buf(), EntryKind::Symlink { target });
      return Ok(());
    };

    let meta = fs::metadata(&resolved).map_err(|e| io_err(&resolved, e))?;
    if meta.is_dir() {
      let parent_canon = dunce::canonicalize(parent).map_err(|e| io_err(parent, e))?;
      if parent_canon.starts_with(&resolved) || chain.contains(&resolved) {
        return Err(FilterError::SymlinkLoop {
          path: link.display().to_string(),
          target: target.display().to_string(),
        });
      }
      if self.is_skipped(&resolved) {
        return Ok(());
      }
      if self.strategy.ignores(Path::new(&rel), true) {
        if self.strategy.prunes() {
          return Ok(());
        }
      } else {
        self.push(rel.clone(), resolved.clone(), EntryKind::Dir);
      }
      chain.push(resolved.clone());
      self.walk(&resolved, &rel, chain)?;
      chain.pop();
    } else if meta.is_file() && !self.strategy.ignores(Path::new(&rel), false) {
      self.push(rel, resolved, file_kind(&meta));
    }
    Ok(())
  }

  fn is_skipped(&self, path: &Path) -> bool {
    let Some(skip) = &self.skip else {
      return false;
    };
    dunce::canonicalize(path).map(|p| &p == skip).unwrap_or(false)
  }

  fn push(&mut self, rel_path: String, source: PathBuf, kind: EntryKind) {
    self.entries.push(FilteredEntry { rel_path, source, kind });
  }
}

fn join_rel(prefix: &str, rel: &Path) -> String {
  let tail = rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join("/");
  if prefix.is_empty() { tail } else { format!("{prefix}/{tail}") }
}

fn file_kind(meta: &fs::Metadata) -> EntryKind {
  EntryKind::File {
    executable: is_owner_executable(meta),
    len: meta.len(),
  }
}

#[cfg(unix)]
fn is_owner_executable(meta: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_owner_executable(_meta: &fs::Metadata) -> bool {
  false
}

/// Resolve `.` and `..` without touching the filesystem (for dangling links).
fn normalize_lexically(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::ParentDir => {
        out.pop();
      }
      Component::CurDir => {}
      other => out.push(other.as_os_str()),
    }
  }
  out
}
