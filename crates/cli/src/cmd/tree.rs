//! Implementation of the `synth tree` command.
//!
//! Prints the construct tree an app builds, without preparing assets or
//! writing anything.

use std::path::Path;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use synthkit_lib::construct::{App, NodeId};
use synthkit_lib::synth::tree_file;

use super::load_app;
use crate::output::print_json;

pub fn cmd_tree(app_path: &Path, context: &[String], json: bool) -> Result<()> {
  let app = load_app(app_path, context)?;
  if json {
    return print_json(&tree_file(&app));
  }
  for line in render(&app) {
    println!("{}", line);
  }
  Ok(())
}

fn render(app: &App) -> Vec<String> {
  fn walk(app: &App, node: NodeId, depth: usize, lines: &mut Vec<String>) {
    let n = app.tree.node(node);
    let kind = format!("({})", n.kind().name());
    lines.push(format!(
      "{}{} {}",
      "  ".repeat(depth),
      n.id(),
      kind.if_supports_color(Stream::Stdout, |s| s.dimmed())
    ));
    for child in n.children() {
      walk(app, *child, depth + 1, lines);
    }
  }

  let mut lines = Vec::new();
  for child in app.tree.children(app.root()) {
    walk(app, *child, 0, &mut lines);
  }
  lines
}
