//! Deferred values.
//!
//! Attributes that are only known at synthesis time (asset locations,
//! resource references, pseudo parameters) are handed to user code as opaque
//! strings and resolved when templates are emitted.
//!
//! # Token Format
//!
//! `${Token[<label>.<n>]}` where `n` indexes the app's [`TokenRegistry`].
//! Tokens may appear anywhere inside a string; a string that is exactly one
//! token is replaced by the token's value, while a string mixing literals and
//! tokens becomes an `Fn::Join` with the empty delimiter.
//!
//! # Example
//!
//! ```
//! use synthkit_lib::token::{parse, Segment, TokenRegistry, TokenValue};
//! use serde_json::json;
//!
//! let mut registry = TokenRegistry::default();
//! let token = registry.register("Greeting", TokenValue::Literal(json!("hi")));
//! let segments = parse(&format!("{token}/there")).unwrap();
//! assert_eq!(segments.len(), 2);
//! assert_eq!(segments[1], Segment::Literal("/there".to_string()));
//! ```

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::construct::NodeId;
use crate::error::{Classify, ErrorKind};

const TOKEN_BEGIN: &str = "${Token[";
const TOKEN_END: &str = "]}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub usize);

/// Deployment-time values every template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoParameter {
  Region,
  AccountId,
  Partition,
  UrlSuffix,
  StackName,
}

impl PseudoParameter {
  pub fn name(&self) -> &'static str {
    match self {
      PseudoParameter::Region => "AWS::Region",
      PseudoParameter::AccountId => "AWS::AccountId",
      PseudoParameter::Partition => "AWS::Partition",
      PseudoParameter::UrlSuffix => "AWS::URLSuffix",
      PseudoParameter::StackName => "AWS::StackName",
    }
  }
}

/// Attributes of an asset that are only known once it is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetAttribute {
  BucketName,
  ObjectKey,
  ObjectUrl,
  Hash,
  StagedPath,
}

/// What a token stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
  /// `{"Ref": <logical id>}` of a resource or parameter node.
  Ref { target: NodeId },
  /// `{"Fn::GetAtt": [<logical id>, <attribute>]}`.
  GetAtt { target: NodeId, attribute: String },
  Asset { asset: NodeId, attribute: AssetAttribute },
  Pseudo(PseudoParameter),
  /// Parts may themselves contain tokens.
  Join { delimiter: String, parts: Vec<Value> },
  /// May itself contain tokens.
  Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub label: String,
  pub value: TokenValue,
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Token(TokenId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
  #[error("unclosed token at position {0}")]
  Unclosed(usize),

  #[error("malformed token: {0}")]
  Malformed(String),

  #[error("unresolved token: {0}")]
  Unresolved(String),

  #[error("token cycle: {0}")]
  Cycle(String),

  #[error("{token} refers to {target} in stack '{target_stack}', which is not stack '{stack}'")]
  CrossStack {
    token: String,
    target: String,
    target_stack: String,
    stack: String,
  },

  #[error("{token} refers to asset {asset}, which has not been staged")]
  NotPrepared { token: String, asset: String },

  #[error("{token} refers to {target}, which cannot be referenced")]
  NotReferenceable { token: String, target: String },

  #[error("tokens are not allowed in object keys: {0}")]
  InKey(String),
}

impl Classify for TokenError {
  fn kind(&self) -> ErrorKind {
    ErrorKind::TokenUnresolved
  }
}

/// Every token minted by an app.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
  tokens: Vec<Token>,
}

impl TokenRegistry {
  /// Mint a token and return its string encoding.
  pub fn register(&mut self, label: &str, value: TokenValue) -> String {
    let id = TokenId(self.tokens.len());
    let label: String = label.chars().filter(|c| !matches!(c, '[' | ']' | '{' | '}' | '$')).collect();
    self.tokens.push(Token { label, value });
    self.encode(id)
  }

  pub fn get(&self, id: TokenId) -> Option<&Token> {
    self.tokens.get(id.0)
  }

  pub fn len(&self) -> usize {
    self.tokens.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tokens.is_empty()
  }

  pub fn encode(&self, id: TokenId) -> String {
    let label = self.get(id).map(|t| t.label.as_str()).unwrap_or("Token");
    format!("{TOKEN_BEGIN}{label}.{}{TOKEN_END}", id.0)
  }

  /// Fails if tokens refer to each other in a cycle.
  pub fn check_acyclic(&self) -> Result<(), TokenError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.tokens.len(), 0);
    let indices: Vec<NodeIndex> = (0..self.tokens.len()).map(|i| graph.add_node(i)).collect();

    for (i, token) in self.tokens.iter().enumerate() {
      let mut refs = Vec::new();
      match &token.value {
        TokenValue::Join { parts, .. } => parts.iter().for_each(|p| referenced_tokens(p, &mut refs)),
        TokenValue::Literal(v) => referenced_tokens(v, &mut refs),
        _ => {}
      }
      for target in refs {
        if let Some(to) = indices.get(target.0) {
          graph.add_edge(indices[i], *to, ());
        }
      }
    }

    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
      let id = TokenId(graph[cycle.node_id()]);
      TokenError::Cycle(self.encode(id))
    })
  }
}

fn referenced_tokens(value: &Value, out: &mut Vec<TokenId>) {
  match value {
    Value::String(s) => {
      if let Ok(segments) = parse(s) {
        out.extend(segments.into_iter().filter_map(|s| match s {
          Segment::Token(id) => Some(id),
          Segment::Literal(_) => None,
        }));
      }
    }
    Value::Array(items) => items.iter().for_each(|v| referenced_tokens(v, out)),
    Value::Object(map) => map.values().for_each(|v| referenced_tokens(v, out)),
    _ => {}
  }
}

/// Whether `s` contains at least one token marker.
pub fn contains_token(s: &str) -> bool {
  s.contains(TOKEN_BEGIN)
}

/// Parse a string into literal and token segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TokenError> {
  let mut segments = Vec::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(start) = rest.find(TOKEN_BEGIN) {
    if start > 0 {
      segments.push(Segment::Literal(rest[..start].to_string()));
    }
    let after = &rest[start + TOKEN_BEGIN.len()..];
    let end = after.find(TOKEN_END).ok_or(TokenError::Unclosed(offset + start))?;
    let content = &after[..end];
    let index = content
      .rsplit_once('.')
      .and_then(|(_, n)| n.parse::<usize>().ok())
      .ok_or_else(|| TokenError::Malformed(format!("{TOKEN_BEGIN}{content}{TOKEN_END}")))?;
    segments.push(Segment::Token(TokenId(index)));

    let consumed = start + TOKEN_BEGIN.len() + end + TOKEN_END.len();
    rest = &rest[consumed..];
    offset += consumed;
  }

  if !rest.is_empty() {
    segments.push(Segment::Literal(rest.to_string()));
  }
  Ok(segments)
}

/// Maps the tokens that depend on synthesis state to template expressions.
///
/// The returned value may contain further tokens; they are resolved in turn.
pub trait Resolver {
  fn resolve(&self, token: &Token, encoded: &str) -> Result<Value, TokenError>;
}

/// Replace every token in `value` in a single pre-order pass.
pub fn resolve(value: &Value, registry: &TokenRegistry, resolver: &dyn Resolver) -> Result<Value, TokenError> {
  let mut engine = Engine {
    registry,
    resolver,
    visiting: Vec::new(),
  };
  engine.value(value)
}

struct Engine<'a> {
  registry: &'a TokenRegistry,
  resolver: &'a dyn Resolver,
  visiting: Vec<TokenId>,
}

impl Engine<'_> {
  fn value(&mut self, value: &Value) -> Result<Value, TokenError> {
    match value {
      Value::String(s) => self.string(s),
      Value::Array(items) => items.iter().map(|v| self.value(v)).collect::<Result<Vec<_>, _>>().map(Value::Array),
      Value::Object(map) => {
        let mut out = Map::new();
        for (key, v) in map {
          if contains_token(key) {
            return Err(TokenError::InKey(key.clone()));
          }
          out.insert(key.clone(), self.value(v)?);
        }
        Ok(Value::Object(out))
      }
      other => Ok(other.clone()),
    }
  }

  fn string(&mut self, s: &str) -> Result<Value, TokenError> {
    if !contains_token(s) {
      return Ok(Value::String(s.to_string()));
    }
    let segments = parse(s)?;
    if let [Segment::Token(id)] = segments.as_slice() {
      return self.token(*id);
    }
    let parts = segments
      .into_iter()
      .map(|segment| match segment {
        Segment::Literal(text) => Ok(Value::String(text)),
        Segment::Token(id) => self.token(id),
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(fn_join("", parts))
  }

  fn token(&mut self, id: TokenId) -> Result<Value, TokenError> {
    let encoded = self.registry.encode(id);
    if self.visiting.contains(&id) {
      return Err(TokenError::Cycle(encoded));
    }
    let registry = self.registry;
    let token = registry.get(id).ok_or_else(|| TokenError::Unresolved(encoded.clone()))?;

    self.visiting.push(id);
    let resolved = match &token.value {
      TokenValue::Join { delimiter, parts } => {
        let parts = parts.iter().map(|p| self.value(p)).collect::<Result<Vec<_>, _>>()?;
        Ok(fn_join(delimiter, parts))
      }
      TokenValue::Literal(v) => self.value(v),
      _ => {
        let raw = self.resolver.resolve(token, &encoded)?;
        self.value(&raw)
      }
    };
    self.visiting.pop();
    resolved
  }
}

/// Build an `Fn::Join`, folding adjacent literals and nested joins with the
/// same delimiter. An all-literal join collapses to a plain string.
pub fn fn_join(delimiter: &str, parts: Vec<Value>) -> Value {
  let mut merged: Vec<Value> = Vec::with_capacity(parts.len());
  for part in parts {
    let items = match nested_join(&part, delimiter) {
      Some(inner) => inner,
      None => vec![part],
    };
    for item in items {
      match (merged.last_mut(), item) {
        (Some(Value::String(prev)), Value::String(next)) => {
          prev.push_str(delimiter);
          prev.push_str(&next);
        }
        (_, item) => merged.push(item),
      }
    }
  }
  match merged.as_slice() {
    [] => Value::String(String::new()),
    [Value::String(s)] => Value::String(s.clone()),
    _ => json!({ "Fn::Join": [delimiter, merged] }),
  }
}

fn nested_join(value: &Value, delimiter: &str) -> Option<Vec<Value>> {
  let args = value.as_object().filter(|m| m.len() == 1)?.get("Fn::Join")?.as_array()?;
  match args.as_slice() {
    [Value::String(d), Value::Array(items)] if d == delimiter => Some(items.clone()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Resolves references to `{"Ref": "Node<N>"}` and fails on assets.
  struct Refs;

  impl Resolver for Refs {
    fn resolve(&self, token: &Token, encoded: &str) -> Result<Value, TokenError> {
      match &token.value {
        TokenValue::Ref { target } => Ok(json!({ "Ref": format!("Node{}", target.0) })),
        TokenValue::Pseudo(p) => Ok(json!({ "Ref": p.name() })),
        _ => Err(TokenError::Unresolved(encoded.to_string())),
      }
    }
  }

  mod parsing {
    use super::*;

    #[test]
    fn parse_plain_string() {
      assert_eq!(parse("hello").unwrap(), vec![Segment::Literal("hello".to_string())]);
      assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn parse_embedded_tokens() {
      let segments = parse("a${Token[X.1]}b${Token[Y.Z.2]}").unwrap();
      assert_eq!(
        segments,
        vec![
          Segment::Literal("a".to_string()),
          Segment::Token(TokenId(1)),
          Segment::Literal("b".to_string()),
          Segment::Token(TokenId(2)),
        ]
      );
    }

    #[test]
    fn parse_unclosed() {
      assert_eq!(parse("ab${Token[X.1"), Err(TokenError::Unclosed(2)));
    }

    #[test]
    fn parse_malformed_index() {
      assert!(matches!(parse("${Token[X.y]}"), Err(TokenError::Malformed(_))));
      assert!(matches!(parse("${Token[]}"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn registered_labels_are_sanitized() {
      let mut registry = TokenRegistry::default();
      let token = registry.register("Odd]Label", TokenValue::Literal(json!(1)));
      assert_eq!(token, "${Token[OddLabel.0]}");
      assert_eq!(parse(&token).unwrap(), vec![Segment::Token(TokenId(0))]);
    }
  }

  mod resolution {
    use super::*;

    #[test]
    fn whole_string_token_is_replaced_by_its_value() {
      let mut registry = TokenRegistry::default();
      let token = registry.register("Ref", TokenValue::Ref { target: NodeId(4) });
      let out = resolve(&json!({ "Bucket": token }), &registry, &Refs).unwrap();
      assert_eq!(out, json!({ "Bucket": { "Ref": "Node4" } }));
    }

    #[test]
    fn embedded_token_becomes_join() {
      let mut registry = TokenRegistry::default();
      let token = registry.register("Ref", TokenValue::Ref { target: NodeId(1) });
      let out = resolve(&json!(format!("prefix-{token}-suffix")), &registry, &Refs).unwrap();
      assert_eq!(out, json!({ "Fn::Join": ["", ["prefix-", { "Ref": "Node1" }, "-suffix"]] }));
    }

    #[test]
    fn literal_tokens_inline_as_strings() {
      let mut registry = TokenRegistry::default();
      let token = registry.register("Hash", TokenValue::Literal(json!("abc")));
      let out = resolve(&json!([format!("x/{token}")]), &registry, &Refs).unwrap();
      assert_eq!(out, json!(["x/abc"]));
    }

    #[test]
    fn join_tokens_nest_and_flatten() {
      let mut registry = TokenRegistry::default();
      let region = registry.register("Region", TokenValue::Pseudo(PseudoParameter::Region));
      let arn = registry.register(
        "Arn",
        TokenValue::Join {
          delimiter: String::new(),
          parts: vec![json!("arn:"), json!(region), json!(":x")],
        },
      );
      let versioned = registry.register(
        "Versioned",
        TokenValue::Join {
          delimiter: String::new(),
          parts: vec![json!(arn), json!("/v1")],
        },
      );

      let out = resolve(&json!(versioned), &registry, &Refs).unwrap();
      assert_eq!(
        out,
        json!({ "Fn::Join": ["", ["arn:", { "Ref": "AWS::Region" }, ":x/v1"]] })
      );
    }

    #[test]
    fn unknown_token_is_unresolved() {
      let registry = TokenRegistry::default();
      let err = resolve(&json!("${Token[Ghost.7]}"), &registry, &Refs).unwrap_err();
      assert!(matches!(err, TokenError::Unresolved(_)));
      assert_eq!(err.kind(), ErrorKind::TokenUnresolved);
    }

    #[test]
    fn token_in_key_is_rejected() {
      let mut registry = TokenRegistry::default();
      let token = registry.register("K", TokenValue::Literal(json!("k")));
      let mut map = Map::new();
      map.insert(token, json!(1));
      assert!(matches!(resolve(&Value::Object(map), &registry, &Refs), Err(TokenError::InKey(_))));
    }

    #[test]
    fn self_reference_is_a_cycle() {
      let mut registry = TokenRegistry::default();
      registry.register("Loop", TokenValue::Literal(json!("${Token[Loop.0]}")));
      assert!(matches!(registry.check_acyclic(), Err(TokenError::Cycle(_))));
      assert!(matches!(
        resolve(&json!("${Token[Loop.0]}"), &registry, &Refs),
        Err(TokenError::Cycle(_))
      ));
    }

    #[test]
    fn acyclic_registry_passes() {
      let mut registry = TokenRegistry::default();
      let a = registry.register("A", TokenValue::Literal(json!("a")));
      registry.register("B", TokenValue::Literal(json!(format!("{a}b"))));
      assert!(registry.check_acyclic().is_ok());
    }
  }

  #[test]
  fn fn_join_collapses_literals() {
    assert_eq!(fn_join("", vec![json!("a"), json!("b")]), json!("ab"));
    assert_eq!(fn_join("-", vec![json!("a"), json!("b")]), json!("a-b"));
    assert_eq!(fn_join("", vec![]), json!(""));
  }
}
