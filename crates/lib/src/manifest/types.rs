//! Cloud assembly types.
//!
//! A synthesis run leaves three kinds of file in the output directory: one
//! template per stack, `manifest.json` describing every stack artifact and
//! staged asset, and `tree.json` with the construct tree.
//!
//! # Example
//!
//! ```json
//! {
//!   "version": "36.0.0",
//!   "artifacts": {
//!     "Stack": {
//!       "type": "aws:cloudformation:stack",
//!       "properties": { "templateFile": "Stack.template.json" },
//!       "metadata": { "/Stack/Code": [{ "type": "aws:cdk:asset", "data": { ... } }] }
//!     }
//!   },
//!   "assets": [{ "id": "3f1c...", "packaging": "zip", ... }]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::asset::types::Packaging;
use crate::construct::MetadataEntry;
use crate::util::hash::Hashable;

pub const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";
pub const TREE_VERSION: &str = "tree-0.1";

/// Contents of `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
  pub version: String,
  /// Stack artifacts keyed by stack name.
  pub artifacts: BTreeMap<String, StackArtifact>,
  /// Every staged asset once, sorted by hash.
  pub assets: Vec<AssetMetadata>,
}

impl Hashable for AssemblyManifest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackArtifact {
  #[serde(rename = "type")]
  pub artifact_type: String,
  pub properties: StackProperties,
  /// Metadata entries keyed by `/`-prefixed construct path.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub metadata: BTreeMap<String, Vec<MetadataEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackProperties {
  pub template_file: String,
}

/// Data of an `aws:cdk:asset` metadata entry, also used for the
/// manifest's `assets` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
  /// Staged file name, relative to the output directory.
  pub path: String,
  pub id: String,
  pub packaging: Packaging,
  pub source_hash: String,
  pub asset_hash: String,
  pub s3_bucket_parameter: String,
  pub s3_key_parameter: String,
}

/// Contents of `tree.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeFile {
  pub version: String,
  pub tree: TreeNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
  pub id: String,
  pub path: String,
  pub kind: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub attributes: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub children: BTreeMap<String, TreeNode>,
}
