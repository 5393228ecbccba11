//! The construct graph.
//!
//! An [`App`] owns the [`ConstructTree`], the token registry and the context
//! map. Every higher-level construct (assets, resources, signing profiles) is
//! built through it.

pub mod logical_id;
pub mod tree;
pub mod types;

use std::collections::BTreeMap;

use serde_json::Value;

pub use tree::ConstructTree;
pub use types::*;

use crate::token::TokenRegistry;

/// String-keyed configuration visible to user code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context(BTreeMap<String, Value>);

impl Context {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn set(&mut self, key: impl Into<String>, value: Value) {
    self.0.insert(key.into(), value);
  }

  /// Reads a boolean flag. Accepts JSON booleans and the strings `"true"`/`"false"`.
  pub fn flag(&self, key: &str, default: bool) -> bool {
    match self.0.get(key) {
      Some(Value::Bool(b)) => *b,
      Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
      Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
      _ => default,
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }
}

impl FromIterator<(String, Value)> for Context {
  fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl Extend<(String, Value)> for Context {
  fn extend<T: IntoIterator<Item = (String, Value)>>(&mut self, iter: T) {
    self.0.extend(iter);
  }
}

/// Root of a construct graph.
#[derive(Debug, Default)]
pub struct App {
  pub tree: ConstructTree,
  pub tokens: TokenRegistry,
  pub context: Context,
}

impl App {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_context(context: Context) -> Self {
    Self {
      context,
      ..Self::default()
    }
  }

  pub fn root(&self) -> NodeId {
    self.tree.root()
  }

  /// Add a stack. Stacks are deployment units and may not nest.
  pub fn add_stack(&mut self, scope: NodeId, id: &str) -> Result<NodeId, ConstructError> {
    let scope_path = self.tree.display_path(scope);
    if self.tree.get(scope).is_some() && self.tree.stack_of(scope).is_some() {
      return Err(ConstructError::invalid(scope_path, "stacks cannot be nested inside another stack"));
    }
    if !is_valid_stack_name(id) {
      return Err(ConstructError::invalid(
        scope_path,
        format!("stack name '{id}' must start with a letter and contain only letters, digits and hyphens"),
      ));
    }
    self.tree.add_child(scope, id, NodeKind::Stack)
  }

  /// Add a plain grouping node.
  pub fn add_construct(&mut self, scope: NodeId, id: &str) -> Result<NodeId, ConstructError> {
    self.tree.add_child(scope, id, NodeKind::Construct)
  }

  /// All stacks in pre-order.
  pub fn stacks(&self) -> Vec<NodeId> {
    self
      .tree
      .descendants(self.root())
      .into_iter()
      .filter(|n| matches!(self.tree.node(*n).kind(), NodeKind::Stack))
      .collect()
  }

  /// The enclosing stack of `scope`, or an error naming what needed one.
  pub fn require_stack(&self, scope: NodeId, what: &str) -> Result<NodeId, ConstructError> {
    self
      .tree
      .stack_of(scope)
      .ok_or_else(|| ConstructError::invalid(self.tree.display_path(scope), format!("{what} must be defined within a stack")))
  }
}

fn is_valid_stack_name(name: &str) -> bool {
  let mut chars = name.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic()) && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}
