use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::filter::{FilterOptions, IgnoreMode, ParseModeError, SymlinkFollowMode};

/// How an asset's fingerprint is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetHashType {
  /// Fingerprint of the filtered source.
  Source,
  /// Fingerprint of the source combined with the bundling configuration.
  Bundle,
  /// Fingerprint of the bundler's output.
  Output,
  /// Digest of a user-supplied string.
  Custom,
}

impl FromStr for AssetHashType {
  type Err = ParseModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "source" => Ok(Self::Source),
      "bundle" => Ok(Self::Bundle),
      "output" => Ok(Self::Output),
      "custom" => Ok(Self::Custom),
      _ => Err(ParseModeError {
        what: "asset hash type",
        value: s.to_string(),
        expected: "source, bundle, output, custom",
      }),
    }
  }
}

/// How the bundler's output directory is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundlingOutput {
  /// A single `.zip`/`.jar` file is an archive; anything else is a directory.
  #[default]
  AutoDiscover,
  Archived,
  NotArchived,
  SingleFile,
}

impl FromStr for BundlingOutput {
  type Err = ParseModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().replace('-', "_").as_str() {
      "auto_discover" => Ok(Self::AutoDiscover),
      "archived" => Ok(Self::Archived),
      "not_archived" => Ok(Self::NotArchived),
      "single_file" => Ok(Self::SingleFile),
      _ => Err(ParseModeError {
        what: "bundling output type",
        value: s.to_string(),
        expected: "auto_discover, archived, not_archived, single_file",
      }),
    }
  }
}

/// The container image a bundler runs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DockerImage {
  /// Pulled from a registry if it is not present locally.
  Registry { name: String },
  /// Built from a local context directory.
  Build {
    path: PathBuf,
    file: Option<String>,
    build_args: BTreeMap<String, String>,
  },
}

impl DockerImage {
  pub fn from_registry(name: impl Into<String>) -> Self {
    DockerImage::Registry { name: name.into() }
  }

  pub fn from_build(path: impl Into<PathBuf>) -> Self {
    DockerImage::Build {
      path: path.into(),
      file: None,
      build_args: BTreeMap::new(),
    }
  }
}

impl fmt::Display for DockerImage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DockerImage::Registry { name } => f.write_str(name),
      DockerImage::Build { path, .. } => write!(f, "build:{}", path.display()),
    }
  }
}

/// An extra bind mount for the bundling container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerVolume {
  pub host_path: PathBuf,
  pub container_path: String,
}

/// An in-process bundler tried before falling back to the container.
pub trait LocalBundling: fmt::Debug + Send + Sync {
  /// Write the bundle into `output_dir`. Returning `false` means "not handled here".
  fn try_bundle(&self, input_dir: &Path, output_dir: &Path) -> bool;
}

#[derive(Debug, Clone)]
pub struct BundlingOptions {
  pub image: DockerImage,
  pub entrypoint: Option<Vec<String>>,
  pub command: Option<Vec<String>>,
  /// `uid:gid` inside the container; defaults to the invoking user.
  pub user: Option<String>,
  /// Defaults to `/asset-input`.
  pub working_directory: Option<String>,
  pub environment: BTreeMap<String, String>,
  pub volumes: Vec<DockerVolume>,
  pub output_type: BundlingOutput,
  pub local: Option<Arc<dyn LocalBundling>>,
}

impl BundlingOptions {
  pub fn new(image: DockerImage) -> Self {
    Self {
      image,
      entrypoint: None,
      command: None,
      user: None,
      working_directory: None,
      environment: BTreeMap::new(),
      volumes: Vec::new(),
      output_type: BundlingOutput::default(),
      local: None,
    }
  }

  pub fn with_command<I, S>(mut self, command: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.command = Some(command.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_output_type(mut self, output_type: BundlingOutput) -> Self {
    self.output_type = output_type;
    self
  }

  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.environment.insert(key.into(), value.into());
    self
  }
}

/// User-facing asset properties.
#[derive(Debug, Clone, Default)]
pub struct AssetProps {
  pub path: PathBuf,
  pub exclude: Vec<String>,
  pub follow: SymlinkFollowMode,
  pub ignore_mode: IgnoreMode,
  pub asset_hash: Option<String>,
  /// Deprecated alias of `asset_hash`.
  pub source_hash: Option<String>,
  pub asset_hash_type: Option<AssetHashType>,
  pub bundling: Option<BundlingOptions>,
}

impl AssetProps {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      ..Default::default()
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  File,
  Directory,
}

/// A validated asset source, ready for the prepare phase.
#[derive(Debug, Clone)]
pub struct AssetSource {
  /// Canonical absolute path.
  pub path: PathBuf,
  pub kind: SourceKind,
  pub filter: FilterOptions,
  pub hash_type: AssetHashType,
  pub custom_hash: Option<String>,
  pub bundling: Option<BundlingOptions>,
}

#[derive(Serialize)]
struct SourceIdentity<'a> {
  path: &'a Path,
  filter: &'a FilterOptions,
  hash_type: AssetHashType,
  custom_hash: &'a Option<String>,
  bundling: Option<BundlingIdentity<'a>>,
}

#[derive(Serialize)]
struct BundlingIdentity<'a> {
  image: &'a DockerImage,
  entrypoint: &'a Option<Vec<String>>,
  command: &'a Option<Vec<String>>,
  user: &'a Option<String>,
  working_directory: &'a Option<String>,
  environment: &'a BTreeMap<String, String>,
  volumes: &'a [DockerVolume],
  output_type: BundlingOutput,
  local: Option<usize>,
}

impl AssetSource {
  /// A key equal for two sources exactly when preparing them is the same work.
  pub fn identity(&self) -> String {
    let identity = SourceIdentity {
      path: &self.path,
      filter: &self.filter,
      hash_type: self.hash_type,
      custom_hash: &self.custom_hash,
      bundling: self.bundling.as_ref().map(|b| BundlingIdentity {
        image: &b.image,
        entrypoint: &b.entrypoint,
        command: &b.command,
        user: &b.user,
        working_directory: &b.working_directory,
        environment: &b.environment,
        volumes: &b.volumes,
        output_type: b.output_type,
        local: b.local.as_ref().map(|l| Arc::as_ptr(l) as *const () as usize),
      }),
    };
    serde_json::to_string(&identity).unwrap_or_else(|_| format!("{:?}", self.path))
  }
}

/// How a staged asset is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
  /// A directory, staged zipped (`asset.<hash>.zip`) or copied (`asset.<hash>`).
  Zip,
  /// A single file uploaded as-is.
  File,
}

/// The result of preparing one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedAsset {
  pub asset_hash: String,
  /// File or directory name inside the staging root.
  pub relative_path: String,
  pub staged_path: PathBuf,
  pub packaging: Packaging,
  /// The staged object is an archive (zip/jar).
  pub is_archive: bool,
  pub source_kind: SourceKind,
  /// Staging found existing content and skipped the copy.
  pub cached: bool,
  pub bundled: bool,
}

impl StagedAsset {
  /// The original file extension of a single-file asset, including the dot.
  pub fn extension(&self) -> Option<&str> {
    let name = self.relative_path.strip_prefix(crate::consts::STAGED_ASSET_PREFIX)?;
    name.find('.').map(|i| &name[i..])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug)]
  struct Never;

  impl LocalBundling for Never {
    fn try_bundle(&self, _: &Path, _: &Path) -> bool {
      false
    }
  }

  fn source(bundling: Option<BundlingOptions>) -> AssetSource {
    AssetSource {
      path: PathBuf::from("/src"),
      kind: SourceKind::Directory,
      filter: FilterOptions::default(),
      hash_type: AssetHashType::Source,
      custom_hash: None,
      bundling,
    }
  }

  #[test]
  fn identity_distinguishes_bundling_configs() {
    let a = source(Some(BundlingOptions::new(DockerImage::from_registry("alpine")).with_command(["a"])));
    let b = source(Some(BundlingOptions::new(DockerImage::from_registry("alpine")).with_command(["b"])));
    assert_ne!(a.identity(), b.identity());
    assert_eq!(a.identity(), a.clone().identity());
  }

  #[test]
  fn identity_distinguishes_local_providers() {
    let mut a = BundlingOptions::new(DockerImage::from_registry("alpine"));
    a.local = Some(Arc::new(Never));
    let mut b = a.clone();
    b.local = Some(Arc::new(Never));
    assert_ne!(source(Some(a.clone())).identity(), source(Some(b)).identity());
    assert_eq!(source(Some(a.clone())).identity(), source(Some(a)).identity());
  }

  #[test]
  fn parses_enum_names() {
    assert_eq!("OUTPUT".parse::<AssetHashType>().unwrap(), AssetHashType::Output);
    assert_eq!("single-file".parse::<BundlingOutput>().unwrap(), BundlingOutput::SingleFile);
    assert!("zip".parse::<BundlingOutput>().is_err());
  }

  #[test]
  fn staged_extension() {
    let staged = StagedAsset {
      asset_hash: "abc".into(),
      relative_path: "asset.abc.tar.gz".into(),
      staged_path: PathBuf::from("/out/asset.abc.tar.gz"),
      packaging: Packaging::File,
      is_archive: false,
      source_kind: SourceKind::File,
      cached: false,
      bundled: false,
    };
    assert_eq!(staged.extension(), Some(".tar.gz"));
  }
}
