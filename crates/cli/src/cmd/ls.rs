//! Implementation of the `synth ls` command.

use std::path::Path;

use anyhow::Result;

use synthkit_lib::synth::stack_names;

use super::load_app;
use crate::output::{Status, print_json, status};

pub fn cmd_ls(app_path: &Path, context: &[String], json: bool) -> Result<()> {
  let app = load_app(app_path, context)?;
  let names = stack_names(&app);

  if json {
    return print_json(&names);
  }
  if names.is_empty() {
    status(Status::Note, "No stacks defined");
    return Ok(());
  }
  for name in names {
    println!("{}", name);
  }
  Ok(())
}
