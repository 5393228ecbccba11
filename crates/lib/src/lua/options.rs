//! Option tables accepted by the `cdk` functions.
//!
//! Tables are deserialized through mlua's serde support into the structs
//! below and then converted into the library's property types. Every
//! failure becomes an `InvalidArgument` at the path of the construct being
//! declared.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mlua::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::asset::types::{AssetProps, BundlingOptions, DockerImage, DockerVolume};
use crate::construct::ConstructError;
use crate::signer::{Platform, SignatureValidity, SigningProfileProps};

/// Deserialize `value` into `T`, reporting failures at `path`.
pub fn parse<T: DeserializeOwned>(lua: &Lua, value: LuaValue, path: &str, what: &str) -> Result<T, ConstructError> {
  lua
    .from_value(value)
    .map_err(|e| ConstructError::invalid(path, format!("invalid {what} options: {e}")))
}

fn parse_enum<T: std::str::FromStr>(value: Option<&str>, path: &str) -> Result<Option<T>, ConstructError>
where
  T::Err: std::fmt::Display,
{
  value
    .map(|v| v.parse::<T>().map_err(|e| ConstructError::invalid(path, e.to_string())))
    .transpose()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetOpts {
  pub path: String,
  #[serde(default)]
  pub exclude: Vec<String>,
  pub follow: Option<String>,
  pub ignore_mode: Option<String>,
  pub asset_hash: Option<String>,
  pub source_hash: Option<String>,
  pub asset_hash_type: Option<String>,
  pub bundling: Option<BundlingOpts>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundlingOpts {
  /// Registry image name.
  pub image: Option<String>,
  /// Build the image from a local context instead.
  pub build: Option<ImageBuildOpts>,
  pub entrypoint: Option<Vec<String>>,
  pub command: Option<Vec<String>>,
  pub user: Option<String>,
  pub working_directory: Option<String>,
  #[serde(default)]
  pub environment: BTreeMap<String, String>,
  #[serde(default)]
  pub volumes: Vec<VolumeOpts>,
  pub output_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageBuildOpts {
  pub path: String,
  pub file: Option<String>,
  #[serde(default)]
  pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeOpts {
  pub host_path: String,
  pub container_path: String,
}

fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
  let path = Path::new(path);
  if path.is_absolute() { path.to_path_buf() } else { base_dir.join(path) }
}

impl AssetOpts {
  pub fn into_props(self, base_dir: &Path, node_path: &str) -> Result<AssetProps, ConstructError> {
    let bundling = self.bundling.map(|b| b.into_options(base_dir, node_path)).transpose()?;
    Ok(AssetProps {
      path: resolve_path(base_dir, &self.path),
      exclude: self.exclude,
      follow: parse_enum(self.follow.as_deref(), node_path)?.unwrap_or_default(),
      ignore_mode: parse_enum(self.ignore_mode.as_deref(), node_path)?.unwrap_or_default(),
      asset_hash: self.asset_hash,
      source_hash: self.source_hash,
      asset_hash_type: parse_enum(self.asset_hash_type.as_deref(), node_path)?,
      bundling,
    })
  }
}

impl BundlingOpts {
  fn into_options(self, base_dir: &Path, node_path: &str) -> Result<BundlingOptions, ConstructError> {
    let image = match (self.image, self.build) {
      (Some(name), None) => DockerImage::from_registry(name),
      (None, Some(build)) => DockerImage::Build {
        path: resolve_path(base_dir, &build.path),
        file: build.file,
        build_args: build.build_args,
      },
      _ => {
        return Err(ConstructError::invalid(
          node_path,
          "bundling needs exactly one of 'image' or 'build'",
        ));
      }
    };
    let mut options = BundlingOptions::new(image);
    options.entrypoint = self.entrypoint;
    options.command = self.command;
    options.user = self.user;
    options.working_directory = self.working_directory;
    options.environment = self.environment;
    options.volumes = self
      .volumes
      .into_iter()
      .map(|v| DockerVolume {
        host_path: resolve_path(base_dir, &v.host_path),
        container_path: v.container_path,
      })
      .collect();
    if let Some(output_type) = parse_enum(self.output_type.as_deref(), node_path)? {
      options.output_type = output_type;
    }
    Ok(options)
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceOpts {
  #[serde(rename = "type")]
  pub resource_type: String,
  #[serde(default)]
  pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidityOpts {
  pub days: Option<u32>,
  pub months: Option<u32>,
  pub years: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningProfileOpts {
  pub platform: String,
  pub signature_validity: Option<ValidityOpts>,
  pub signing_profile_name: Option<String>,
  #[serde(default)]
  pub tags: BTreeMap<String, String>,
}

impl SigningProfileOpts {
  pub fn into_props(self, node_path: &str) -> Result<SigningProfileProps, ConstructError> {
    let signature_validity = match self.signature_validity {
      None => None,
      Some(ValidityOpts {
        days: Some(n),
        months: None,
        years: None,
      }) => Some(SignatureValidity::Days(n)),
      Some(ValidityOpts {
        days: None,
        months: Some(n),
        years: None,
      }) => Some(SignatureValidity::Months(n)),
      Some(ValidityOpts {
        days: None,
        months: None,
        years: Some(n),
      }) => Some(SignatureValidity::Years(n)),
      Some(_) => {
        return Err(ConstructError::invalid(
          node_path,
          "signature_validity needs exactly one of 'days', 'months' or 'years'",
        ));
      }
    };
    Ok(SigningProfileProps {
      platform: Platform::from_name(&self.platform),
      signature_validity,
      signing_profile_name: self.signing_profile_name,
      tags: self.tags,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::asset::filter::{IgnoreMode, SymlinkFollowMode};
  use crate::asset::types::{AssetHashType, BundlingOutput};

  fn eval(lua: &Lua, code: &str) -> LuaValue {
    lua.load(code).eval().unwrap()
  }

  #[test]
  fn asset_options_resolve_relative_paths_and_modes() {
    let lua = Lua::new();
    let value = eval(
      &lua,
      r#"return {
        path = "src",
        exclude = { "*.md" },
        follow = "block_external",
        ignore_mode = "git",
        asset_hash_type = "output",
        bundling = {
          image = "golang:1.22",
          command = { "go", "build" },
          environment = { CGO_ENABLED = "0" },
          output_type = "single_file",
        },
      }"#,
    );
    let opts: AssetOpts = parse(&lua, value, "Stack/Code", "asset").unwrap();
    let props = opts.into_props(Path::new("/app"), "Stack/Code").unwrap();

    assert_eq!(props.path, PathBuf::from("/app/src"));
    assert_eq!(props.exclude, vec!["*.md".to_string()]);
    assert_eq!(props.follow, SymlinkFollowMode::BlockExternal);
    assert_eq!(props.ignore_mode, IgnoreMode::Git);
    assert_eq!(props.asset_hash_type, Some(AssetHashType::Output));
    let bundling = props.bundling.unwrap();
    assert_eq!(bundling.image, DockerImage::from_registry("golang:1.22"));
    assert_eq!(bundling.output_type, BundlingOutput::SingleFile);
    assert_eq!(bundling.environment["CGO_ENABLED"], "0");
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let lua = Lua::new();
    let value = eval(&lua, r#"return { path = "x", excludes = {} }"#);
    let err = parse::<AssetOpts>(&lua, value, "Stack/Code", "asset").unwrap_err();
    assert!(err.to_string().contains("invalid asset options"));
  }

  #[test]
  fn bad_mode_names_are_invalid_arguments() {
    let opts = AssetOpts {
      path: "x".into(),
      exclude: vec![],
      follow: Some("sometimes".into()),
      ignore_mode: None,
      asset_hash: None,
      source_hash: None,
      asset_hash_type: None,
      bundling: None,
    };
    let err = opts.into_props(Path::new("/"), "Stack/Code").unwrap_err();
    assert_eq!(err.path(), "Stack/Code");
  }

  #[test]
  fn validity_needs_one_unit() {
    let opts = SigningProfileOpts {
      platform: "AWS_LAMBDA_SHA384_ECDSA".into(),
      signature_validity: Some(ValidityOpts {
        days: Some(1),
        months: Some(1),
        years: None,
      }),
      signing_profile_name: None,
      tags: BTreeMap::new(),
    };
    assert!(opts.into_props("Stack/Signer").is_err());
  }
}
