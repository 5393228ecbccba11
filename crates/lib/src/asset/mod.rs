//! Local file and directory assets.
//!
//! Declaring an [`Asset`] validates the source and records it in the
//! construct tree. Nothing is hashed, bundled or copied until synthesis runs
//! the [`pipeline`] for it; until then user code only sees tokens for the
//! bucket, key and URL the asset will end up at.

pub mod bundle;
pub mod filter;
pub mod pipeline;
pub mod stage;
pub mod types;

use serde_json::Value;
use tracing::warn;

use crate::construct::{App, AssetNode, ConstructError, NodeId, NodeKind};
use crate::consts::{
  ASSET_RESOURCE_METADATA_ENABLED_CONTEXT, ASSET_RESOURCE_METADATA_PATH_KEY, ASSET_RESOURCE_METADATA_PROPERTY_KEY,
};
use crate::error::{Classify, ErrorKind};
use crate::resource::resource_mut;
use crate::token::{AssetAttribute, TokenValue};
use bundle::BundleError;
use filter::{FilterError, FilterOptions, collect};
use stage::StageError;
use types::{AssetHashType, AssetProps, AssetSource, SourceKind};

use crate::util::hash::HashError;

/// Failure while preparing an asset.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AssetError {
  #[error(transparent)]
  Filter(#[from] FilterError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Bundle(#[from] BundleError),

  #[error(transparent)]
  Stage(#[from] StageError),

  #[error("io error at {path}: {message}")]
  Io { path: String, message: String },

  #[error("asset preparation task failed: {message}")]
  Task { message: String },

  #[error("asset preparation was cancelled")]
  Cancelled,
}

impl Classify for AssetError {
  fn kind(&self) -> ErrorKind {
    match self {
      AssetError::Filter(e) => e.kind(),
      AssetError::Hash(e) => e.kind(),
      AssetError::Bundle(e) => e.kind(),
      AssetError::Stage(e) => e.kind(),
      AssetError::Io { .. } | AssetError::Task { .. } => ErrorKind::FilesystemError,
      AssetError::Cancelled => ErrorKind::Cancelled,
    }
  }
}

/// A declared asset and the tokens describing where it will be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
  pub node: NodeId,
  pub s3_bucket_name: String,
  pub s3_object_key: String,
  pub s3_object_url: String,
  pub asset_hash: String,
  /// File name of the staged object inside the output directory.
  pub asset_path: String,
}

impl Asset {
  /// Declare an asset under `scope`.
  ///
  /// The source is checked and walked immediately so that missing paths,
  /// bad patterns and symlink policy violations surface at construction. On
  /// error the tree is left unchanged.
  pub fn new(app: &mut App, scope: NodeId, id: &str, props: AssetProps) -> Result<Self, ConstructError> {
    app.require_stack(scope, "assets")?;
    let local_id = app.tree.validate_child(scope, id)?;
    let node_path = match app.tree.path(scope) {
      parent if parent.is_empty() => local_id,
      parent => format!("{parent}/{local_id}"),
    };
    let source = validate(&props, &node_path)?;

    collect(&source.path, &source.filter, None).map_err(|source| ConstructError::Filter {
      path: node_path.clone(),
      source,
    })?;

    let node = app.tree.add_child(
      scope,
      id,
      NodeKind::Asset(Box::new(AssetNode { source, staged: None })),
    )?;

    let mut token = |label: &str, attribute| app.tokens.register(label, TokenValue::Asset { asset: node, attribute });
    Ok(Self {
      node,
      s3_bucket_name: token("AssetBucket", AssetAttribute::BucketName),
      s3_object_key: token("AssetKey", AssetAttribute::ObjectKey),
      s3_object_url: token("AssetUrl", AssetAttribute::ObjectUrl),
      asset_hash: token("AssetHash", AssetAttribute::Hash),
      asset_path: token("AssetPath", AssetAttribute::StagedPath),
    })
  }

  /// Record on `resource` that `property` points at this asset, so local
  /// tooling can map the resource back to the staged files.
  ///
  /// A no-op unless `aws:cdk:enable-asset-metadata` is set in the context.
  pub fn add_resource_metadata(&self, app: &mut App, resource: NodeId, property: &str) -> Result<(), ConstructError> {
    if !app.context.flag(ASSET_RESOURCE_METADATA_ENABLED_CONTEXT, false) {
      return Ok(());
    }
    if property.is_empty() {
      return Err(ConstructError::invalid(app.tree.display_path(resource), "resource property name must not be empty"));
    }
    let path = self.asset_path.clone();
    let resource = resource_mut(app, resource)?;
    resource
      .cfn_metadata
      .insert(ASSET_RESOURCE_METADATA_PATH_KEY.to_string(), Value::String(path));
    resource
      .cfn_metadata
      .insert(ASSET_RESOURCE_METADATA_PROPERTY_KEY.to_string(), Value::String(property.to_string()));
    Ok(())
  }
}

fn validate(props: &AssetProps, node_path: &str) -> Result<AssetSource, ConstructError> {
  let invalid = |message: String| ConstructError::invalid(node_path, message);

  let path = dunce::canonicalize(&props.path)
    .map_err(|e| invalid(format!("cannot find asset at {}: {e}", props.path.display())))?;
  let kind = if path.is_dir() { SourceKind::Directory } else { SourceKind::File };

  let custom_hash = match (&props.asset_hash, &props.source_hash) {
    (Some(asset_hash), Some(_)) => {
      warn!(path = %node_path, "both asset_hash and the deprecated source_hash are set; using asset_hash");
      Some(asset_hash.clone())
    }
    (Some(hash), None) | (None, Some(hash)) => Some(hash.clone()),
    (None, None) => None,
  };
  if matches!(&custom_hash, Some(h) if h.is_empty()) {
    return Err(invalid("asset_hash must not be empty".to_string()));
  }

  let hash_type = match (props.asset_hash_type, &custom_hash, &props.bundling) {
    (Some(AssetHashType::Custom), None, _) => {
      return Err(invalid("asset_hash_type CUSTOM requires asset_hash".to_string()));
    }
    (Some(t), Some(_), _) if t != AssetHashType::Custom => {
      return Err(invalid(format!(
        "asset_hash can only be combined with asset_hash_type CUSTOM, not {t:?}"
      )));
    }
    (Some(t @ (AssetHashType::Bundle | AssetHashType::Output)), _, None) => {
      return Err(invalid(format!("asset_hash_type {t:?} requires bundling")));
    }
    (Some(t), _, _) => t,
    (None, Some(_), _) => AssetHashType::Custom,
    (None, None, Some(_)) => AssetHashType::Output,
    (None, None, None) => AssetHashType::Source,
  };

  if props.bundling.is_some() && kind != SourceKind::Directory {
    return Err(invalid("bundling requires a directory source".to_string()));
  }

  Ok(AssetSource {
    path,
    kind,
    filter: FilterOptions {
      exclude: props.exclude.clone(),
      follow: props.follow,
      ignore_mode: props.ignore_mode,
    },
    hash_type,
    custom_hash,
    bundling: props.bundling.clone(),
  })
}
