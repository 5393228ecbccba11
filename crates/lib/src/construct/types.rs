use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::asset::types::{AssetSource, StagedAsset};
use crate::error::{Classify, ErrorKind};
use crate::asset::filter::FilterError;
use crate::resource::CfnResource;

/// Handle to a node in a [`super::ConstructTree`]. Only meaningful for the
/// tree that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Lifecycle of the tree. Metadata and children may be added during
/// construction and prepare; a locked tree is read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
  Construction,
  Prepare,
  Locked,
}

/// A typed metadata entry attached to a node, kept in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
  #[serde(rename = "type")]
  pub key: String,
  pub data: Value,
}

/// State carried by an asset node.
#[derive(Debug, Clone)]
pub struct AssetNode {
  pub source: AssetSource,
  /// Filled in during prepare.
  pub staged: Option<StagedAsset>,
}

/// Which of the two per-asset template parameters a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AssetParameterRole {
  Bucket,
  VersionKey,
}

/// A template parameter synthesized for an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfnParameter {
  pub asset_hash: String,
  pub role: AssetParameterRole,
  pub description: String,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
  App,
  Stack,
  Construct,
  Asset(Box<AssetNode>),
  Resource(CfnResource),
  Parameter(CfnParameter),
  /// A reference to something that exists outside this app.
  Imported { attributes: BTreeMap<String, String> },
}

impl NodeKind {
  pub fn name(&self) -> &'static str {
    match self {
      NodeKind::App => "app",
      NodeKind::Stack => "stack",
      NodeKind::Construct => "construct",
      NodeKind::Asset(_) => "asset",
      NodeKind::Resource(_) => "resource",
      NodeKind::Parameter(_) => "parameter",
      NodeKind::Imported { .. } => "imported",
    }
  }
}

#[derive(Debug, Clone)]
pub struct Node {
  pub(crate) id: String,
  pub(crate) parent: Option<NodeId>,
  pub(crate) children: Vec<NodeId>,
  pub(crate) child_index: HashMap<String, NodeId>,
  pub(crate) metadata: Vec<MetadataEntry>,
  pub(crate) kind: NodeKind,
}

impl Node {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn parent(&self) -> Option<NodeId> {
    self.parent
  }

  pub fn children(&self) -> &[NodeId] {
    &self.children
  }

  pub fn metadata(&self) -> &[MetadataEntry] {
    &self.metadata
  }

  pub fn kind(&self) -> &NodeKind {
    &self.kind
  }
}

/// Errors raised while building the construct tree.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConstructError {
  #[error("there is already a construct with id '{id}' in {parent}")]
  DuplicateChildId { parent: String, id: String },

  #[error("invalid argument at {path}: {message}")]
  InvalidArgument { path: String, message: String },

  #[error("{path}: {source}")]
  Filter {
    path: String,
    #[source]
    source: FilterError,
  },

  #[error("cannot modify {path}: the construct tree is locked")]
  Locked { path: String },
}

impl ConstructError {
  pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
    ConstructError::InvalidArgument {
      path: path.into(),
      message: message.into(),
    }
  }

  /// Construct path the failure is attributed to.
  pub fn path(&self) -> &str {
    match self {
      ConstructError::DuplicateChildId { parent, .. } => parent,
      ConstructError::InvalidArgument { path, .. }
      | ConstructError::Filter { path, .. }
      | ConstructError::Locked { path } => path,
    }
  }
}

impl Classify for ConstructError {
  fn kind(&self) -> ErrorKind {
    match self {
      ConstructError::DuplicateChildId { .. } => ErrorKind::DuplicateChildId,
      ConstructError::InvalidArgument { .. } | ConstructError::Locked { .. } => ErrorKind::InvalidArgument,
      ConstructError::Filter { source, .. } => source.kind(),
    }
  }
}
