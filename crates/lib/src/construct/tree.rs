//! Arena-backed construct tree.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. The root has
//! the empty id; every other node has a non-empty id unique among its
//! siblings, and its path is the `/`-joined ids from the root down.

use std::collections::HashMap;

use serde_json::Value;

use super::types::{ConstructError, MetadataEntry, Node, NodeId, NodeKind, Phase};

#[derive(Debug, Clone)]
pub struct ConstructTree {
  nodes: Vec<Node>,
  phase: Phase,
}

impl Default for ConstructTree {
  fn default() -> Self {
    Self::new()
  }
}

impl ConstructTree {
  pub fn new() -> Self {
    let root = Node {
      id: String::new(),
      parent: None,
      children: Vec::new(),
      child_index: HashMap::new(),
      metadata: Vec::new(),
      kind: NodeKind::App,
    };
    Self {
      nodes: vec![root],
      phase: Phase::Construction,
    }
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  /// Move to the prepare phase. Children may still be added.
  pub fn begin_prepare(&mut self) {
    if self.phase < Phase::Prepare {
      self.phase = Phase::Prepare;
    }
  }

  /// Freeze the tree. Every later mutation fails with [`ConstructError::Locked`].
  pub fn lock(&mut self) {
    self.phase = Phase::Locked;
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// The node behind `id`.
  ///
  /// # Panics
  ///
  /// If `id` was minted by another tree and is out of range here. Use
  /// [`ConstructTree::get`] for ids that did not come from this tree.
  pub fn node(&self, id: NodeId) -> &Node {
    &self.nodes[id.0]
  }

  pub fn get(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(id.0)
  }

  /// Check that `id` can be added under `parent`, returning the sanitized id.
  ///
  /// Callers that must do more fallible work before inserting validate first,
  /// so a failure never leaves a half-built node behind.
  pub fn validate_child(&self, parent: NodeId, id: &str) -> Result<String, ConstructError> {
    let parent_path = self.display_path(parent);
    if self.phase == Phase::Locked {
      return Err(ConstructError::Locked { path: parent_path });
    }
    if self.get(parent).is_none() {
      return Err(ConstructError::invalid(parent_path, "scope does not belong to this app"));
    }
    if id.is_empty() {
      return Err(ConstructError::invalid(parent_path, "construct id must not be empty"));
    }
    let sanitized = sanitize_id(id);
    if self.node(parent).child_index.contains_key(&sanitized) {
      return Err(ConstructError::DuplicateChildId {
        parent: parent_path,
        id: sanitized,
      });
    }
    Ok(sanitized)
  }

  /// Attach a new child. On error the tree is unchanged.
  pub fn add_child(&mut self, parent: NodeId, id: &str, kind: NodeKind) -> Result<NodeId, ConstructError> {
    let id = self.validate_child(parent, id)?;
    let node_id = NodeId(self.nodes.len());
    self.nodes.push(Node {
      id: id.clone(),
      parent: Some(parent),
      children: Vec::new(),
      child_index: HashMap::new(),
      metadata: Vec::new(),
      kind,
    });
    let parent = &mut self.nodes[parent.0];
    parent.children.push(node_id);
    parent.child_index.insert(id, node_id);
    Ok(node_id)
  }

  /// Children in insertion order; empty for an id this tree does not know.
  pub fn children(&self, id: NodeId) -> &[NodeId] {
    self.get(id).map_or(&[], |node| &node.children)
  }

  pub fn find_child(&self, parent: NodeId, id: &str) -> Option<NodeId> {
    self.get(parent)?.child_index.get(id).copied()
  }

  /// Look a node up by its `/`-joined path. The empty path is the root.
  pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
    path
      .trim_matches('/')
      .split('/')
      .filter(|c| !c.is_empty())
      .try_fold(self.root(), |node, id| self.find_child(node, id))
  }

  /// Ids from the root (exclusive) down to `id` (inclusive). Empty for the
  /// root and for an id this tree does not know.
  pub fn path_components(&self, id: NodeId) -> Vec<&str> {
    let mut components: Vec<&str> = self.ancestors(id).map(|n| self.node(n).id.as_str()).collect();
    components.pop();
    components.reverse();
    components
  }

  pub fn path(&self, id: NodeId) -> String {
    self.path_components(id).join("/")
  }

  /// Path for messages; the root is shown as `/`.
  pub fn display_path(&self, id: NodeId) -> String {
    if self.get(id).is_none() {
      return format!("<unknown node {}>", id.0);
    }
    let path = self.path(id);
    if path.is_empty() { "/".to_string() } else { path }
  }

  /// `id` followed by each ancestor up to and including the root.
  pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    std::iter::successors(self.get(id).map(|_| id), move |n| self.node(*n).parent)
  }

  /// The closest enclosing stack, including `id` itself.
  pub fn stack_of(&self, id: NodeId) -> Option<NodeId> {
    self.ancestors(id).find(|n| matches!(self.node(*n).kind, NodeKind::Stack))
  }

  /// `id` and all of its descendants in pre-order, children in insertion order.
  pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(node) = stack.pop() {
      let Some(entry) = self.get(node) else {
        continue;
      };
      out.push(node);
      stack.extend(entry.children.iter().rev().copied());
    }
    out
  }

  pub fn add_metadata(&mut self, id: NodeId, key: &str, data: Value) -> Result<(), ConstructError> {
    self.ensure_mutable(id)?;
    if key.is_empty() {
      return Err(ConstructError::invalid(self.display_path(id), "metadata key must not be empty"));
    }
    self.nodes[id.0].metadata.push(MetadataEntry {
      key: key.to_string(),
      data,
    });
    Ok(())
  }

  pub fn kind_mut(&mut self, id: NodeId) -> Result<&mut NodeKind, ConstructError> {
    self.ensure_mutable(id)?;
    Ok(&mut self.nodes[id.0].kind)
  }

  fn ensure_mutable(&self, id: NodeId) -> Result<(), ConstructError> {
    if self.get(id).is_none() {
      return Err(ConstructError::invalid(self.display_path(id), "node does not belong to this app"));
    }
    if self.phase == Phase::Locked {
      return Err(ConstructError::Locked {
        path: self.display_path(id),
      });
    }
    Ok(())
  }
}

/// Path separators are not allowed inside an id.
fn sanitize_id(id: &str) -> String {
  id.replace('/', "--")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{Classify, ErrorKind};
  use serde_json::json;

  fn sample() -> (ConstructTree, NodeId, NodeId) {
    let mut tree = ConstructTree::new();
    let stack = tree.add_child(tree.root(), "Stack", NodeKind::Stack).unwrap();
    let group = tree.add_child(stack, "Group", NodeKind::Construct).unwrap();
    (tree, stack, group)
  }

  #[test]
  fn paths_join_ids() {
    let (tree, stack, group) = sample();
    assert_eq!(tree.path(tree.root()), "");
    assert_eq!(tree.path(stack), "Stack");
    assert_eq!(tree.path(group), "Stack/Group");
    assert_eq!(tree.display_path(tree.root()), "/");
  }

  #[test]
  fn find_by_path_round_trips() {
    let (tree, stack, group) = sample();
    assert_eq!(tree.find_by_path(""), Some(tree.root()));
    assert_eq!(tree.find_by_path("Stack"), Some(stack));
    assert_eq!(tree.find_by_path("/Stack/Group"), Some(group));
    assert_eq!(tree.find_by_path("Stack/Missing"), None);
  }

  #[test]
  fn duplicate_child_leaves_tree_unchanged() {
    let (mut tree, stack, _) = sample();
    let before = tree.len();
    let err = tree.add_child(stack, "Group", NodeKind::Construct).unwrap_err();
    assert_eq!(
      err,
      ConstructError::DuplicateChildId {
        parent: "Stack".to_string(),
        id: "Group".to_string()
      }
    );
    assert_eq!(err.kind(), ErrorKind::DuplicateChildId);
    assert_eq!(tree.len(), before);
    assert_eq!(tree.children(stack).len(), 1);
  }

  #[test]
  fn ids_from_another_tree_do_not_panic() {
    let (tree, _, _) = sample();
    let mut other = ConstructTree::new();
    let mut foreign = other.root();
    for id in ["A", "B", "C", "D"] {
      foreign = other.add_child(foreign, id, NodeKind::Construct).unwrap();
    }

    assert!(tree.get(foreign).is_none());
    assert!(tree.children(foreign).is_empty());
    assert!(tree.descendants(foreign).is_empty());
    assert_eq!(tree.path(foreign), "");
    assert_eq!(tree.stack_of(foreign), None);
    assert!(tree.display_path(foreign).starts_with("<unknown node"));
  }

  #[test]
  fn empty_id_is_rejected() {
    let (mut tree, stack, _) = sample();
    let err = tree.add_child(stack, "", NodeKind::Construct).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
  }

  #[test]
  fn slashes_in_ids_are_sanitized() {
    let (mut tree, stack, _) = sample();
    let node = tree.add_child(stack, "a/b", NodeKind::Construct).unwrap();
    assert_eq!(tree.path(node), "Stack/a--b");
    assert!(tree.add_child(stack, "a--b", NodeKind::Construct).is_err());
  }

  #[test]
  fn children_keep_insertion_order() {
    let (mut tree, stack, group) = sample();
    let z = tree.add_child(stack, "Z", NodeKind::Construct).unwrap();
    let a = tree.add_child(stack, "A", NodeKind::Construct).unwrap();
    assert_eq!(tree.children(stack), &[group, z, a]);
    assert_eq!(tree.descendants(tree.root()), vec![tree.root(), stack, group, z, a]);
  }

  #[test]
  fn stack_of_finds_enclosing_stack() {
    let (tree, stack, group) = sample();
    assert_eq!(tree.stack_of(group), Some(stack));
    assert_eq!(tree.stack_of(stack), Some(stack));
    assert_eq!(tree.stack_of(tree.root()), None);
  }

  #[test]
  fn metadata_is_ordered_and_locked_after_synthesis() {
    let (mut tree, _, group) = sample();
    tree.add_metadata(group, "note", json!("first")).unwrap();
    tree.add_metadata(group, "note", json!("second")).unwrap();
    let data: Vec<_> = tree.node(group).metadata().iter().map(|m| m.data.clone()).collect();
    assert_eq!(data, vec![json!("first"), json!("second")]);

    tree.begin_prepare();
    assert!(tree.add_child(group, "Late", NodeKind::Construct).is_ok());

    tree.lock();
    assert!(matches!(
      tree.add_metadata(group, "note", json!(1)),
      Err(ConstructError::Locked { .. })
    ));
    assert!(matches!(
      tree.add_child(group, "TooLate", NodeKind::Construct),
      Err(ConstructError::Locked { .. })
    ));
  }
}
