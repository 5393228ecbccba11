//! Template resources.
//!
//! A [`CfnResource`] is the typed record behind every `Resources` entry. It
//! carries PascalCase properties as JSON plus an escape hatch of property
//! overrides merged in at render time.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::construct::{App, ConstructError, NodeId, NodeKind};
use crate::token::TokenValue;

#[derive(Debug, Clone, PartialEq)]
pub struct CfnResource {
  pub resource_type: String,
  pub properties: BTreeMap<String, Value>,
  /// Dotted property paths overriding or extending `properties`.
  pub overrides: BTreeMap<String, Value>,
  /// Template-level `Metadata` of the resource.
  pub cfn_metadata: BTreeMap<String, Value>,
}

impl CfnResource {
  pub fn new(resource_type: impl Into<String>) -> Self {
    Self {
      resource_type: resource_type.into(),
      properties: BTreeMap::new(),
      overrides: BTreeMap::new(),
      cfn_metadata: BTreeMap::new(),
    }
  }

  pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
    self.properties.insert(name.into(), value);
    self
  }

  /// Record an override at a dotted path such as `Code.S3Bucket`.
  pub fn add_property_override(&mut self, path: impl Into<String>, value: Value) {
    self.overrides.insert(path.into(), value);
  }

  /// Properties with overrides applied, in key order.
  pub fn rendered_properties(&self) -> Map<String, Value> {
    let mut root: Map<String, Value> = self.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    for (path, value) in &self.overrides {
      apply_override(&mut root, path, value.clone());
    }
    root
  }
}

fn apply_override(root: &mut Map<String, Value>, path: &str, value: Value) {
  let mut parts = path.split('.').peekable();
  let mut current = root;
  while let Some(part) = parts.next() {
    if parts.peek().is_none() {
      current.insert(part.to_string(), value);
      return;
    }
    let entry = current.entry(part.to_string()).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
      *entry = Value::Object(Map::new());
    }
    let Value::Object(next) = entry else {
      return;
    };
    current = next;
  }
}

/// Handle to a resource node plus its reference token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
  pub node: NodeId,
  /// Resolves to `{"Ref": <logical id>}`.
  pub ref_token: String,
}

impl ResourceRef {
  /// A token resolving to `{"Fn::GetAtt": [<logical id>, attribute]}`.
  pub fn get_att(&self, app: &mut App, attribute: &str) -> String {
    app.tokens.register(
      attribute,
      TokenValue::GetAtt {
        target: self.node,
        attribute: attribute.to_string(),
      },
    )
  }
}

/// Add a resource under `scope`, which must be inside a stack.
pub fn add_resource(app: &mut App, scope: NodeId, id: &str, resource: CfnResource) -> Result<ResourceRef, ConstructError> {
  app.require_stack(scope, "resources")?;
  if resource.resource_type.trim().is_empty() {
    return Err(ConstructError::invalid(
      app.tree.display_path(scope),
      format!("resource '{id}' needs a type"),
    ));
  }
  let node = app.tree.add_child(scope, id, NodeKind::Resource(resource))?;
  let ref_token = app.tokens.register(id, TokenValue::Ref { target: node });
  Ok(ResourceRef { node, ref_token })
}

/// Mutable access to the resource behind `node`.
pub fn resource_mut(app: &mut App, node: NodeId) -> Result<&mut CfnResource, ConstructError> {
  let path = app.tree.display_path(node);
  match app.tree.kind_mut(node)? {
    NodeKind::Resource(resource) => Ok(resource),
    _ => Err(ConstructError::invalid(path, "not a resource")),
  }
}
