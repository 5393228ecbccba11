//! Template rendering for one stack.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::construct::logical_id::make_unique_id;
use crate::construct::{App, AssetParameterRole, ConstructError, NodeId, NodeKind};
use crate::consts::{ASSET_KEY_SEPARATOR, PATH_METADATA_ENABLE_CONTEXT, PATH_METADATA_KEY};
use crate::token::{self, AssetAttribute, Resolver, Token, TokenError, TokenValue, fn_join};

/// Logical ids of the referenceable nodes of one stack, plus the parameter
/// pair of each asset hash used in it.
#[derive(Debug, Default)]
pub struct StackIds {
  pub logical_ids: HashMap<NodeId, String>,
  pub asset_parameters: HashMap<String, (NodeId, NodeId)>,
}

/// Logical id of `node` relative to `stack`.
pub fn logical_id(app: &App, stack: NodeId, node: NodeId) -> String {
  let components = app.tree.path_components(node);
  let depth = app.tree.path_components(stack).len();
  make_unique_id(&components[depth.min(components.len())..])
}

/// Assign logical ids to every resource and parameter of `stack`.
pub fn assign_ids(app: &App, stack: NodeId) -> Result<StackIds, ConstructError> {
  let mut ids = StackIds::default();
  let mut taken: HashMap<String, NodeId> = HashMap::new();
  for node in app.tree.descendants(stack) {
    let kind = app.tree.node(node).kind();
    if !matches!(kind, NodeKind::Resource(_) | NodeKind::Parameter(_)) {
      continue;
    }
    let id = logical_id(app, stack, node);
    if let Some(other) = taken.insert(id.clone(), node) {
      return Err(ConstructError::invalid(
        app.tree.display_path(node),
        format!("logical id '{id}' is already used by {}", app.tree.display_path(other)),
      ));
    }
    if let NodeKind::Parameter(param) = kind {
      let entry = ids.asset_parameters.entry(param.asset_hash.clone()).or_insert((node, node));
      match param.role {
        AssetParameterRole::Bucket => entry.0 = node,
        AssetParameterRole::VersionKey => entry.1 = node,
      }
    }
    ids.logical_ids.insert(node, id);
  }
  Ok(ids)
}

/// Resolves tokens against the state of one stack.
pub struct StackResolver<'a> {
  pub app: &'a App,
  pub stack: NodeId,
  pub ids: &'a StackIds,
}

impl StackResolver<'_> {
  fn same_stack(&self, encoded: &str, target: NodeId) -> Result<(), TokenError> {
    let tree = &self.app.tree;
    match tree.stack_of(target) {
      Some(s) if s == self.stack => Ok(()),
      other => Err(TokenError::CrossStack {
        token: encoded.to_string(),
        target: tree.display_path(target),
        target_stack: other.map(|s| tree.display_path(s)).unwrap_or_else(|| "<none>".to_string()),
        stack: tree.display_path(self.stack),
      }),
    }
  }

  fn logical_id(&self, encoded: &str, target: NodeId) -> Result<&str, TokenError> {
    self.same_stack(encoded, target)?;
    self.ids.logical_ids.get(&target).map(String::as_str).ok_or_else(|| TokenError::NotReferenceable {
      token: encoded.to_string(),
      target: self.app.tree.display_path(target),
    })
  }

  fn asset(&self, encoded: &str, asset: NodeId, attribute: AssetAttribute) -> Result<Value, TokenError> {
    self.same_stack(encoded, asset)?;
    let tree = &self.app.tree;
    let not_prepared = || TokenError::NotPrepared {
      token: encoded.to_string(),
      asset: tree.display_path(asset),
    };
    let NodeKind::Asset(node) = tree.node(asset).kind() else {
      return Err(TokenError::NotReferenceable {
        token: encoded.to_string(),
        target: tree.display_path(asset),
      });
    };
    let staged = node.staged.as_ref().ok_or_else(not_prepared)?;

    let (bucket, key) = match attribute {
      AssetAttribute::Hash => return Ok(Value::String(staged.asset_hash.clone())),
      AssetAttribute::StagedPath => return Ok(Value::String(staged.relative_path.clone())),
      _ => self.ids.asset_parameters.get(&staged.asset_hash).ok_or_else(not_prepared)?,
    };
    let bucket_ref = json!({ "Ref": self.logical_id(encoded, *bucket)? });
    let key_ref = json!({ "Ref": self.logical_id(encoded, *key)? });
    let key_part = |index: usize| {
      json!({ "Fn::Select": [index, { "Fn::Split": [ASSET_KEY_SEPARATOR, key_ref.clone()] }] })
    };
    let object_key = fn_join("", vec![key_part(0), key_part(1)]);

    Ok(match attribute {
      AssetAttribute::BucketName => bucket_ref,
      AssetAttribute::ObjectUrl => fn_join(
        "",
        vec![Value::String("s3://".into()), bucket_ref, Value::String("/".into()), object_key],
      ),
      _ => object_key,
    })
  }
}

impl Resolver for StackResolver<'_> {
  fn resolve(&self, token: &Token, encoded: &str) -> Result<Value, TokenError> {
    match &token.value {
      TokenValue::Ref { target } => Ok(json!({ "Ref": self.logical_id(encoded, *target)? })),
      TokenValue::GetAtt { target, attribute } => {
        Ok(json!({ "Fn::GetAtt": [self.logical_id(encoded, *target)?, attribute] }))
      }
      TokenValue::Asset { asset, attribute } => self.asset(encoded, *asset, *attribute),
      TokenValue::Pseudo(p) => Ok(json!({ "Ref": p.name() })),
      TokenValue::Join { .. } | TokenValue::Literal(_) => Err(TokenError::Unresolved(encoded.to_string())),
    }
  }
}

/// Build the template of `stack` with every token still encoded.
pub fn render(app: &App, stack: NodeId, ids: &StackIds) -> Value {
  let path_metadata = app.context.flag(PATH_METADATA_ENABLE_CONTEXT, false);
  let mut parameters = Map::new();
  let mut resources = Map::new();

  for node in app.tree.descendants(stack) {
    let Some(id) = ids.logical_ids.get(&node) else {
      continue;
    };
    match app.tree.node(node).kind() {
      NodeKind::Parameter(param) => {
        parameters.insert(
          id.clone(),
          json!({ "Type": "String", "Description": param.description }),
        );
      }
      NodeKind::Resource(resource) => {
        let mut body = Map::new();
        body.insert("Type".into(), Value::String(resource.resource_type.clone()));
        let properties = resource.rendered_properties();
        if !properties.is_empty() {
          body.insert("Properties".into(), Value::Object(properties));
        }
        let mut metadata: Map<String, Value> =
          resource.cfn_metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if path_metadata {
          metadata.insert(PATH_METADATA_KEY.into(), Value::String(app.tree.path(node)));
        }
        if !metadata.is_empty() {
          body.insert("Metadata".into(), Value::Object(metadata));
        }
        resources.insert(id.clone(), Value::Object(body));
      }
      _ => {}
    }
  }

  let mut template = Map::new();
  if !parameters.is_empty() {
    template.insert("Parameters".into(), Value::Object(parameters));
  }
  template.insert("Resources".into(), Value::Object(resources));
  Value::Object(template)
}

/// Render and resolve the template of `stack`.
pub fn synthesize_template(app: &App, stack: NodeId, ids: &StackIds) -> Result<Value, TokenError> {
  let resolver = StackResolver { app, stack, ids };
  token::resolve(&render(app, stack, ids), &app.tokens, &resolver)
}
