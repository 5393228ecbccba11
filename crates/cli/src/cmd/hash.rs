//! Implementation of the `synth hash` command.
//!
//! Prints the SOURCE fingerprint an asset at `path` would get with the given
//! filter options.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use synthkit_lib::asset::filter::{FilterOptions, collect};
use synthkit_lib::util::hash::fingerprint;

pub fn cmd_hash(path: &Path, exclude: Vec<String>, ignore_mode: &str, follow: &str) -> Result<()> {
  let options = FilterOptions {
    exclude,
    follow: follow.parse().map_err(|e| anyhow!("{}", e))?,
    ignore_mode: ignore_mode.parse().map_err(|e| anyhow!("{}", e))?,
  };
  let root = dunce::canonicalize(path).with_context(|| format!("Failed to resolve {}", path.display()))?;
  let entries = collect(&root, &options, None).with_context(|| format!("Failed to walk {}", root.display()))?;
  let hash = fingerprint(&entries).with_context(|| format!("Failed to fingerprint {}", root.display()))?;
  println!("{}", hash);
  Ok(())
}
