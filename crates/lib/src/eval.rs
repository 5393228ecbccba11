//! App script evaluation.
//!
//! [`evaluate_app`] runs a Lua script against a fresh [`App`] and hands the
//! resulting construct tree back. Construction errors raised inside the
//! script come back as [`EvalError::Construct`] with their original kind, so
//! callers see the same diagnostics whether an app was built from Rust or Lua.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;
use tracing::{debug, info};

use crate::construct::{App, ConstructError, Context};
use crate::error::{Classify, ErrorKind};
use crate::lua::runtime;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
  #[error(transparent)]
  Construct(#[from] ConstructError),

  #[error("{path}: {message}")]
  Lua { path: PathBuf, message: String },

  #[error("app script {path} still holds references to the app after evaluation")]
  Leaked { path: PathBuf },
}

impl EvalError {
  /// Construct path for construction errors, the script path otherwise.
  pub fn path(&self) -> String {
    match self {
      EvalError::Construct(e) => e.path().to_string(),
      EvalError::Lua { path, .. } | EvalError::Leaked { path } => path.display().to_string(),
    }
  }
}

impl Classify for EvalError {
  fn kind(&self) -> ErrorKind {
    match self {
      EvalError::Construct(e) => e.kind(),
      EvalError::Lua { .. } | EvalError::Leaked { .. } => ErrorKind::InvalidArgument,
    }
  }
}

/// Dig the construction error out of a Lua error chain, if there is one.
fn construct_error(err: &LuaError) -> Option<ConstructError> {
  match err {
    LuaError::CallbackError { cause, .. } => construct_error(cause),
    LuaError::WithContext { cause, .. } => construct_error(cause),
    LuaError::ExternalError(inner) => inner.downcast_ref::<ConstructError>().cloned(),
    _ => None,
  }
}

fn classify_lua_error(path: &Path, err: LuaError) -> EvalError {
  match construct_error(&err) {
    Some(e) => EvalError::Construct(e),
    None => EvalError::Lua {
      path: path.to_path_buf(),
      message: err.to_string(),
    },
  }
}

/// Evaluate the app script at `path` with `context` and return the app it
/// built.
///
/// The script runs top to bottom and declares constructs through `cdk`. It
/// may also return a function, which is called with `cdk.app` once the
/// script body has finished.
pub fn evaluate_app(path: &Path, context: Context) -> Result<App, EvalError> {
  let app = Rc::new(RefCell::new(App::with_context(context)));

  {
    let lua = runtime::create_runtime(app.clone()).map_err(|e| classify_lua_error(path, e))?;
    info!(path = %path.display(), "evaluating app");
    let result = runtime::load_file(&lua, path).map_err(|e| classify_lua_error(path, e))?;
    if let LuaValue::Function(main) = result {
      debug!("calling returned app function");
      let cdk: LuaTable = lua.globals().get("cdk").map_err(|e| classify_lua_error(path, e))?;
      let root: LuaValue = cdk.get("app").map_err(|e| classify_lua_error(path, e))?;
      main.call::<()>(root).map_err(|e| classify_lua_error(path, e))?;
    }
    // lua is dropped here, releasing its references to the app
  }

  let app = Rc::try_unwrap(app)
    .map_err(|_| EvalError::Leaked {
      path: path.to_path_buf(),
    })?
    .into_inner();
  debug!(nodes = app.tree.len(), stacks = app.stacks().len(), "app evaluated");
  Ok(app)
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use tempfile::TempDir;

  use super::*;
  use crate::construct::NodeKind;
  use crate::util::testutil::write_tree;

  fn script(temp: &TempDir, body: &str) -> PathBuf {
    write_tree(temp.path(), &[("app.lua", body)]);
    temp.path().join("app.lua")
  }

  #[test]
  fn builds_the_tree() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("handler/index.js", "exports.handler = 1")]);
    let path = script(
      &temp,
      r#"
      local stack = cdk.stack(cdk.app, "Web")
      local code = cdk.asset(stack, "Code", { path = "handler" })
      local fn = cdk.resource(stack, "Handler", {
        type = "AWS::Lambda::Function",
        properties = { Code = { S3Bucket = code.s3_bucket_name, S3Key = code.s3_object_key } },
      })
      code:add_resource_metadata(fn, "Code")
      "#,
    );

    let app = evaluate_app(&path, Context::new()).unwrap();
    assert_eq!(app.stacks().len(), 1);
    let asset = app.tree.find_by_path("Web/Code").unwrap();
    let NodeKind::Asset(node) = app.tree.node(asset).kind() else {
      panic!("expected an asset");
    };
    assert!(node.source.path.ends_with("handler"));
  }

  #[test]
  fn returned_function_receives_the_root() {
    let temp = TempDir::new().unwrap();
    let path = script(
      &temp,
      r#"
      return function(app)
        cdk.stack(app, "Late")
      end
      "#,
    );
    let app = evaluate_app(&path, Context::new()).unwrap();
    assert!(app.tree.find_by_path("Late").is_some());
  }

  #[test]
  fn context_reaches_the_script() {
    let temp = TempDir::new().unwrap();
    let path = script(
      &temp,
      r#"
      cdk.stack(cdk.app, cdk.context("stack_name"))
      "#,
    );
    let context = Context::from_iter([("stack_name".to_string(), json!("FromContext"))]);
    let app = evaluate_app(&path, context).unwrap();
    assert!(app.tree.find_by_path("FromContext").is_some());
  }

  #[test]
  fn construct_errors_keep_their_kind() {
    let temp = TempDir::new().unwrap();
    let path = script(
      &temp,
      r#"
      local stack = cdk.stack(cdk.app, "Web")
      cdk.construct(stack, "Api")
      cdk.construct(stack, "Api")
      "#,
    );
    let err = evaluate_app(&path, Context::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateChildId);
    assert_eq!(err.path(), "Web");
  }

  #[test]
  fn missing_asset_path_is_a_construct_error() {
    let temp = TempDir::new().unwrap();
    let path = script(
      &temp,
      r#"
      local stack = cdk.stack(cdk.app, "Web")
      cdk.asset(stack, "Code", { path = "does-not-exist" })
      "#,
    );
    let err = evaluate_app(&path, Context::new()).unwrap_err();
    assert!(matches!(err, EvalError::Construct(_)));
    assert_eq!(err.path(), "Web/Code");
  }

  #[test]
  fn script_errors_are_lua_errors() {
    let temp = TempDir::new().unwrap();
    let path = script(&temp, "error('boom')");
    let err = evaluate_app(&path, Context::new()).unwrap_err();
    assert!(matches!(err, EvalError::Lua { .. }));
    assert!(err.to_string().contains("boom"));
  }
}
