//! Synthesis: prepare every asset, then emit the cloud assembly.
//!
//! # Phases
//!
//! 1. **Prepare**: the tree stops accepting user constructs and every unique
//!    asset source is run through the asset pipeline, bounded by
//!    [`SynthConfig::parallelism`]. Identical sources share one task.
//! 2. **Bind**: each stack gets a pair of parameter nodes per asset hash and
//!    each asset node gets its `aws:cdk:asset` metadata. The tree is then
//!    locked.
//! 3. **Emit**: templates are rendered, tokens resolved, and templates,
//!    `manifest.json` and `tree.json` written atomically.
//!
//! A failure while preparing or emitting a stack aborts that stack only; all
//! failures are reported together as [`SynthError::StacksFailed`].

pub mod template;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::asset::AssetError;
use crate::asset::bundle::Bundler;
use crate::asset::pipeline::{PipelineContext, prepare_asset};
use crate::asset::stage::DirectoryPackaging;
use crate::asset::types::{AssetSource, StagedAsset};
use crate::cancel::CancelSignal;
use crate::construct::{App, AssetParameterRole, CfnParameter, ConstructError, MetadataEntry, NodeId, NodeKind};
use crate::consts::{ASSET_METADATA, BUNDLING_GRACE_SECS, CLOUD_ASSEMBLY_VERSION, MANIFEST_FILE, TEMPLATE_FILE_SUFFIX, TREE_FILE};
use crate::error::{Classify, Diagnostic, ErrorKind};
use crate::manifest::{
  AssemblyManifest, AssetMetadata, STACK_ARTIFACT_TYPE, StackArtifact, StackProperties, TREE_VERSION, TreeFile, TreeNode,
  WriteError, write_json,
};
use crate::platform::{self, paths};
use crate::token::{self, TokenError};
use template::{StackIds, StackResolver, assign_ids, synthesize_template};

/// Configuration for a synthesis run.
#[derive(Debug, Clone)]
pub struct SynthConfig {
  /// Cloud assembly directory; also the staging root.
  pub outdir: PathBuf,
  /// Maximum number of assets prepared at once.
  pub parallelism: usize,
  pub container_program: String,
  pub directory_packaging: DirectoryPackaging,
  pub verify_custom_hashes: bool,
  /// Time between SIGTERM and SIGKILL for a cancelled container.
  pub bundling_grace: Duration,
  pub cancel: CancelSignal,
}

impl Default for SynthConfig {
  fn default() -> Self {
    Self {
      outdir: paths::default_outdir(),
      parallelism: platform::available_parallelism(),
      container_program: paths::container_program(),
      directory_packaging: DirectoryPackaging::default(),
      verify_custom_hashes: false,
      bundling_grace: Duration::from_secs(BUNDLING_GRACE_SECS),
      cancel: CancelSignal::never(),
    }
  }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SynthError {
  #[error(transparent)]
  Token(#[from] TokenError),

  #[error(transparent)]
  Write(#[from] WriteError),

  #[error("{} stack(s) failed to synthesize", .0.len())]
  StacksFailed(Vec<Diagnostic>),
}

impl SynthError {
  /// One diagnostic per failure, attributed to the construct path involved.
  pub fn diagnostics(&self) -> Vec<Diagnostic> {
    match self {
      SynthError::StacksFailed(diagnostics) => diagnostics.clone(),
      other => vec![Diagnostic::new("", other)],
    }
  }
}

impl Classify for SynthError {
  fn kind(&self) -> ErrorKind {
    match self {
      SynthError::Token(e) => e.kind(),
      SynthError::Write(e) => e.kind(),
      SynthError::StacksFailed(d) => d.first().map(|d| d.kind).unwrap_or(ErrorKind::InvalidArgument),
    }
  }
}

/// One emitted stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackOutput {
  pub name: String,
  pub template_path: PathBuf,
  pub template: Value,
}

/// Everything a completed run wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudAssembly {
  pub outdir: PathBuf,
  pub manifest: AssemblyManifest,
  pub stacks: Vec<StackOutput>,
  /// Unique staged assets, sorted by hash.
  pub assets: Vec<StagedAsset>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthOutcome {
  Complete(CloudAssembly),
  /// Cancelled during prepare. Nothing was emitted; already committed
  /// staged assets were kept.
  Cancelled,
}

struct AssetGroup {
  source: AssetSource,
  nodes: Vec<NodeId>,
}

/// Synthesize `app` into `config.outdir`.
pub async fn synthesize(app: &mut App, config: &SynthConfig) -> Result<SynthOutcome, SynthError> {
  app.tree.begin_prepare();
  app.tokens.check_acyclic()?;

  fs::create_dir_all(&config.outdir).map_err(|e| WriteError {
    path: config.outdir.display().to_string(),
    message: e.to_string(),
  })?;
  let outdir = dunce::canonicalize(&config.outdir).map_err(|e| WriteError {
    path: config.outdir.display().to_string(),
    message: e.to_string(),
  })?;

  let groups = group_assets(app);
  info!(assets = groups.len(), outdir = %outdir.display(), "preparing assets");

  let ctx = PipelineContext {
    staging_root: outdir.clone(),
    bundler: Bundler::new(config.container_program.clone(), config.cancel.clone()).with_grace(config.bundling_grace),
    packaging: config.directory_packaging,
    verify_custom_hashes: config.verify_custom_hashes,
    cancel: config.cancel.clone(),
  };
  let results = prepare_all(&groups, ctx, config.parallelism).await;

  if config.cancel.is_cancelled() || results.iter().any(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Cancelled)) {
    warn!("synthesis cancelled");
    return Ok(SynthOutcome::Cancelled);
  }

  let mut failures: BTreeMap<NodeId, Vec<Diagnostic>> = BTreeMap::new();
  let mut staged_assets: BTreeMap<String, StagedAsset> = BTreeMap::new();
  for (group, result) in groups.iter().zip(results) {
    for node in &group.nodes {
      let stack = app.tree.stack_of(*node).unwrap_or(app.root());
      match &result {
        Ok(staged) => {
          if let Ok(NodeKind::Asset(asset)) = app.tree.kind_mut(*node) {
            asset.staged = Some(staged.clone());
          }
        }
        Err(e) => {
          error!(path = %app.tree.display_path(*node), error = %e, "asset preparation failed");
          failures.entry(stack).or_default().push(Diagnostic::new(app.tree.display_path(*node), e));
        }
      }
    }
    if let Ok(staged) = result {
      staged_assets.entry(staged.asset_hash.clone()).or_insert(staged);
    }
  }

  let stacks = app.stacks();
  let mut asset_entries: BTreeMap<String, AssetMetadata> = BTreeMap::new();
  for stack in &stacks {
    if failures.contains_key(stack) {
      continue;
    }
    match bind_stack_assets(app, *stack) {
      Ok(entries) => asset_entries.extend(entries.into_iter().map(|e| (e.id.clone(), e))),
      Err(e) => failures
        .entry(*stack)
        .or_default()
        .push(Diagnostic::new(e.path().to_string(), &e)),
    }
  }
  app.tree.lock();

  let mut manifest = AssemblyManifest {
    version: CLOUD_ASSEMBLY_VERSION.to_string(),
    artifacts: BTreeMap::new(),
    assets: asset_entries.into_values().collect(),
  };
  let mut outputs = Vec::new();
  for stack in &stacks {
    if failures.contains_key(stack) {
      continue;
    }
    let name = app.tree.node(*stack).id().to_string();
    match emit_stack(app, *stack, &outdir) {
      Ok((artifact, output)) => {
        manifest.artifacts.insert(name, artifact);
        outputs.push(output);
      }
      Err(diagnostic) => failures.entry(*stack).or_default().push(diagnostic),
    }
  }

  write_json(&outdir.join(MANIFEST_FILE), &manifest)?;
  write_json(&outdir.join(TREE_FILE), &tree_file(app))?;

  if !failures.is_empty() {
    return Err(SynthError::StacksFailed(failures.into_values().flatten().collect()));
  }

  info!(stacks = outputs.len(), assets = staged_assets.len(), "synthesis complete");
  Ok(SynthOutcome::Complete(CloudAssembly {
    outdir,
    manifest,
    stacks: outputs,
    assets: staged_assets.into_values().collect(),
  }))
}

/// Asset nodes in pre-order, grouped by the work preparing them takes.
fn group_assets(app: &App) -> Vec<AssetGroup> {
  let mut groups: Vec<AssetGroup> = Vec::new();
  let mut index: HashMap<String, usize> = HashMap::new();
  for node in app.tree.descendants(app.root()) {
    let NodeKind::Asset(asset) = app.tree.node(node).kind() else {
      continue;
    };
    let identity = asset.source.identity();
    match index.get(&identity) {
      Some(&i) => groups[i].nodes.push(node),
      None => {
        index.insert(identity, groups.len());
        groups.push(AssetGroup {
          source: asset.source.clone(),
          nodes: vec![node],
        });
      }
    }
  }
  groups
}

async fn prepare_all(
  groups: &[AssetGroup],
  ctx: PipelineContext,
  parallelism: usize,
) -> Vec<Result<StagedAsset, AssetError>> {
  let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
  let ctx = Arc::new(ctx);
  let mut join_set = JoinSet::new();

  for (i, group) in groups.iter().enumerate() {
    let source = group.source.clone();
    let ctx = ctx.clone();
    let semaphore = semaphore.clone();
    join_set.spawn(async move {
      let result = match semaphore.acquire_owned().await {
        Ok(_permit) => prepare_asset(&source, &ctx).await,
        Err(e) => Err(AssetError::Task { message: e.to_string() }),
      };
      (i, result)
    });
  }

  let mut results: Vec<Option<Result<StagedAsset, AssetError>>> = groups.iter().map(|_| None).collect();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((i, result)) => {
        if let Ok(staged) = &result {
          debug!(hash = %staged.asset_hash, cached = staged.cached, "asset prepared");
        }
        results[i] = Some(result);
      }
      Err(e) => error!(error = %e, "asset task panicked"),
    }
  }
  results
    .into_iter()
    .map(|r| {
      r.unwrap_or_else(|| {
        Err(AssetError::Task {
          message: "asset task did not complete".to_string(),
        })
      })
    })
    .collect()
}

/// Add parameter nodes and `aws:cdk:asset` metadata for the assets of `stack`.
fn bind_stack_assets(app: &mut App, stack: NodeId) -> Result<Vec<AssetMetadata>, ConstructError> {
  let assets: Vec<(NodeId, StagedAsset)> = app
    .tree
    .descendants(stack)
    .into_iter()
    .filter_map(|node| match app.tree.node(node).kind() {
      NodeKind::Asset(asset) => asset.staged.clone().map(|s| (node, s)),
      _ => None,
    })
    .collect();

  let mut params: HashMap<String, (String, String)> = HashMap::new();
  let mut entries = Vec::new();
  for (node, staged) in assets {
    let hash = staged.asset_hash.clone();
    let (bucket, key) = match params.get(&hash) {
      Some(ids) => ids.clone(),
      None => {
        let ids = add_parameters(app, stack, node, &hash)?;
        params.insert(hash.clone(), ids.clone());
        ids
      }
    };
    let entry = AssetMetadata {
      path: staged.relative_path.clone(),
      id: hash.clone(),
      packaging: staged.packaging,
      source_hash: hash.clone(),
      asset_hash: hash,
      s3_bucket_parameter: bucket,
      s3_key_parameter: key,
    };
    let data = serde_json::to_value(&entry)
      .map_err(|e| ConstructError::invalid(app.tree.display_path(node), e.to_string()))?;
    app.tree.add_metadata(node, ASSET_METADATA, data)?;
    entries.push(entry);
  }
  Ok(entries)
}

fn add_parameters(app: &mut App, stack: NodeId, asset: NodeId, hash: &str) -> Result<(String, String), ConstructError> {
  let asset_path = app.tree.path(asset);
  let group = match app.tree.find_child(stack, "AssetParameters") {
    Some(group) => group,
    None => app.add_construct(stack, "AssetParameters")?,
  };
  let scope = app.add_construct(group, hash)?;

  let mut add = |id: &str, role, description: String| -> Result<String, ConstructError> {
    let node = app.tree.add_child(
      scope,
      id,
      NodeKind::Parameter(CfnParameter {
        asset_hash: hash.to_string(),
        role,
        description,
      }),
    )?;
    Ok(template::logical_id(app, stack, node))
  };
  let bucket = add("S3Bucket", AssetParameterRole::Bucket, format!("S3 bucket for asset \"{asset_path}\""))?;
  let key = add(
    "S3VersionKey",
    AssetParameterRole::VersionKey,
    format!("S3 key for asset version \"{asset_path}\""),
  )?;
  Ok((bucket, key))
}

fn emit_stack(app: &App, stack: NodeId, outdir: &Path) -> Result<(StackArtifact, StackOutput), Diagnostic> {
  let stack_path = app.tree.display_path(stack);
  let ids = assign_ids(app, stack).map_err(|e| Diagnostic::new(e.path().to_string(), &e))?;
  let template = synthesize_template(app, stack, &ids).map_err(|e| Diagnostic::new(stack_path.clone(), &e))?;
  let metadata = stack_metadata(app, stack, &ids).map_err(|e| Diagnostic::new(stack_path.clone(), &e))?;

  let name = app.tree.node(stack).id().to_string();
  let template_file = format!("{name}{TEMPLATE_FILE_SUFFIX}");
  let template_path = outdir.join(&template_file);
  write_json(&template_path, &template).map_err(|e| Diagnostic::new(stack_path, &e))?;
  debug!(stack = %name, path = %template_path.display(), "wrote template");

  Ok((
    StackArtifact {
      artifact_type: STACK_ARTIFACT_TYPE.to_string(),
      properties: StackProperties { template_file },
      metadata,
    },
    StackOutput {
      name,
      template_path,
      template,
    },
  ))
}

/// Metadata of every node in `stack`, keyed by `/`-prefixed path, with
/// tokens resolved.
fn stack_metadata(
  app: &App,
  stack: NodeId,
  ids: &StackIds,
) -> Result<BTreeMap<String, Vec<MetadataEntry>>, TokenError> {
  let resolver = StackResolver { app, stack, ids };
  let mut out = BTreeMap::new();
  for node in app.tree.descendants(stack) {
    let entries = app.tree.node(node).metadata();
    if entries.is_empty() {
      continue;
    }
    let resolved = entries
      .iter()
      .map(|entry| {
        Ok(MetadataEntry {
          key: entry.key.clone(),
          data: token::resolve(&entry.data, &app.tokens, &resolver)?,
        })
      })
      .collect::<Result<Vec<_>, TokenError>>()?;
    out.insert(format!("/{}", app.tree.path(node)), resolved);
  }
  Ok(out)
}

/// The `tree.json` document for `app`.
pub fn tree_file(app: &App) -> TreeFile {
  fn build(app: &App, node: NodeId) -> TreeNode {
    let n = app.tree.node(node);
    let mut attributes = BTreeMap::new();
    if let NodeKind::Resource(resource) = n.kind() {
      attributes.insert("aws:cdk:cloudformation:type".to_string(), resource.resource_type.clone());
    }
    TreeNode {
      id: if n.parent().is_none() { "App".to_string() } else { n.id().to_string() },
      path: app.tree.path(node),
      kind: n.kind().name().to_string(),
      attributes,
      children: n
        .children()
        .iter()
        .map(|c| (app.tree.node(*c).id().to_string(), build(app, *c)))
        .collect(),
    }
  }
  TreeFile {
    version: TREE_VERSION.to_string(),
    tree: build(app, app.root()),
  }
}

/// Stack names in the order they were declared.
pub fn stack_names(app: &App) -> Vec<String> {
  app.stacks().into_iter().map(|s| app.tree.node(s).id().to_string()).collect()
}
