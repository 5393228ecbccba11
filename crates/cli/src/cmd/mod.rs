mod hash;
mod ls;
pub mod synth;
mod tree;

pub use hash::cmd_hash;
pub use ls::cmd_ls;
pub use synth::cmd_synth;
pub use tree::cmd_tree;

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use serde_json::Value;

use synthkit_lib::construct::{App, Context};
use synthkit_lib::consts::{ASSET_RESOURCE_METADATA_ENABLED_CONTEXT, PATH_METADATA_ENABLE_CONTEXT};
use synthkit_lib::error::Diagnostic;
use synthkit_lib::eval::evaluate_app;
use synthkit_lib::platform::paths::context_from_env;

use crate::output::print_diagnostic;

/// Parse `key=value`. Values that are valid JSON are taken as JSON,
/// anything else as a plain string.
fn parse_context_arg(arg: &str) -> Result<(String, Value)> {
  let Some((key, raw)) = arg.split_once('=') else {
    bail!("invalid context '{}': expected KEY=VALUE", arg);
  };
  if key.is_empty() {
    bail!("invalid context '{}': key must not be empty", arg);
  }
  let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
  Ok((key.to_string(), value))
}

/// The context an app is evaluated with.
///
/// Path and asset metadata are on by default, as for any CLI-driven
/// synthesis; `CDK_CONTEXT_JSON` and then `-c` arguments override them.
pub fn build_context(args: &[String]) -> Result<Context> {
  let mut context = Context::new();
  context.set(PATH_METADATA_ENABLE_CONTEXT, Value::Bool(true));
  context.set(ASSET_RESOURCE_METADATA_ENABLED_CONTEXT, Value::Bool(true));
  context.extend(context_from_env().context("Failed to read context from the environment")?);
  for arg in args {
    let (key, value) = parse_context_arg(arg)?;
    context.set(key, value);
  }
  Ok(context)
}

/// Evaluate the app script, rendering construction failures as diagnostics.
pub fn load_app(path: &Path, context_args: &[String]) -> Result<App> {
  let context = build_context(context_args)?;
  match evaluate_app(path, context) {
    Ok(app) => Ok(app),
    Err(e) => {
      print_diagnostic(&Diagnostic::new(e.path(), &e));
      bail!("Failed to evaluate app: {}", path.display())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  fn context_args_parse_json_or_string() {
    assert_eq!(parse_context_arg("env=prod").unwrap(), ("env".to_string(), Value::from("prod")));
    assert_eq!(parse_context_arg("replicas=3").unwrap(), ("replicas".to_string(), Value::from(3)));
    assert_eq!(parse_context_arg("flag=true").unwrap(), ("flag".to_string(), Value::Bool(true)));
    assert_eq!(parse_context_arg("url=a=b").unwrap(), ("url".to_string(), Value::from("a=b")));
    assert!(parse_context_arg("novalue").is_err());
    assert!(parse_context_arg("=x").is_err());
  }

  #[test]
  #[serial]
  fn args_override_defaults() {
    temp_env::with_var_unset("CDK_CONTEXT_JSON", || {
      let context = build_context(&[format!("{PATH_METADATA_ENABLE_CONTEXT}=false")]).unwrap();
      assert!(!context.flag(PATH_METADATA_ENABLE_CONTEXT, true));
      assert!(context.flag(ASSET_RESOURCE_METADATA_ENABLED_CONTEXT, false));
    });
  }

  #[test]
  #[serial]
  fn args_override_env_context() {
    temp_env::with_var("CDK_CONTEXT_JSON", Some(r#"{"stage": "dev", "region": "eu"}"#), || {
      let context = build_context(&["stage=prod".to_string()]).unwrap();
      assert_eq!(context.get("stage"), Some(&Value::from("prod")));
      assert_eq!(context.get("region"), Some(&Value::from("eu")));
    });
  }
}
