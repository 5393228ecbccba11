//! Environment-derived locations and programs.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::consts::{
  DEFAULT_CONTAINER_PROGRAM, DEFAULT_OUTDIR, ENV_CONTAINER_PROGRAM, ENV_CONTEXT_JSON, ENV_OUTDIR,
};

/// Errors reading environment-provided configuration.
#[derive(Debug, thiserror::Error)]
pub enum EnvConfigError {
  #[error("CDK_CONTEXT_JSON is not valid JSON: {message}")]
  InvalidContextJson { message: String },

  #[error("CDK_CONTEXT_JSON must be a JSON object")]
  ContextNotObject,
}

fn non_empty_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Returns the container program, honoring `CDK_DOCKER`.
pub fn container_program() -> String {
  non_empty_var(ENV_CONTAINER_PROGRAM).unwrap_or_else(|| DEFAULT_CONTAINER_PROGRAM.to_string())
}

/// Returns the cloud assembly directory, honoring `CDK_OUTDIR`.
pub fn default_outdir() -> PathBuf {
  non_empty_var(ENV_OUTDIR)
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTDIR))
}

/// Reads the context map from `CDK_CONTEXT_JSON`; empty when unset.
pub fn context_from_env() -> Result<Map<String, Value>, EnvConfigError> {
  let Some(raw) = non_empty_var(ENV_CONTEXT_JSON) else {
    return Ok(Map::new());
  };
  let value: Value =
    serde_json::from_str(&raw).map_err(|e| EnvConfigError::InvalidContextJson { message: e.to_string() })?;
  match value {
    Value::Object(map) => Ok(map),
    _ => Err(EnvConfigError::ContextNotObject),
  }
}
