//! Terminal rendering for `synth`.
//!
//! Diagnostics, stack lines and asset lines each have one renderer so every
//! command prints them the same way. Colors are dropped when the stream is
//! not a terminal.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use synthkit_lib::asset::types::StagedAsset;
use synthkit_lib::error::Diagnostic;
use synthkit_lib::synth::{CloudAssembly, StackOutput};

/// Characters of an asset hash shown in listings.
const SHORT_HASH_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Done,
  Note,
  Warning,
}

impl Status {
  fn symbol(self) -> &'static str {
    match self {
      Status::Done => "✓",
      Status::Note => "•",
      Status::Warning => "⚠",
    }
  }
}

/// One status line. Warnings go to stderr.
pub fn status(kind: Status, message: &str) {
  let symbol = kind.symbol();
  match kind {
    Status::Done => println!("{} {}", symbol.if_supports_color(Stream::Stdout, |s| s.green()), message),
    Status::Note => println!("{} {}", symbol.if_supports_color(Stream::Stdout, |s| s.blue()), message),
    Status::Warning => eprintln!(
      "{} {}",
      symbol.if_supports_color(Stream::Stderr, |s| s.yellow()),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
  }
}

/// `✗ error[Kind] at path: message`, then the hint on its own line.
pub fn print_diagnostic(diagnostic: &Diagnostic) {
  let path = if diagnostic.path.is_empty() { "/" } else { diagnostic.path.as_str() };
  let head = format!("error[{}] at {}:", diagnostic.kind, path);
  eprintln!(
    "{} {} {}",
    "✗".if_supports_color(Stream::Stderr, |s| s.red()),
    head.if_supports_color(Stream::Stderr, |s| s.red()),
    diagnostic.message
  );
  if !diagnostic.hint.is_empty() {
    let hint = format!("hint: {}", diagnostic.hint);
    eprintln!("  {}", hint.if_supports_color(Stream::Stderr, |s| s.dimmed()));
  }
}

pub fn short_hash(hash: &str) -> &str {
  hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

pub fn format_elapsed(elapsed: Duration) -> String {
  let millis = elapsed.as_millis();
  match millis {
    0..=999 => format!("{millis}ms"),
    1_000..=59_999 => format!("{:.2}s", elapsed.as_secs_f64()),
    _ => format!("{}m{:02}s", millis / 60_000, (millis / 1_000) % 60),
  }
}

pub fn stack_line(stack: &StackOutput) -> String {
  format!("{} → {}", stack.name, stack.template_path.display())
}

/// `<short hash> <staged name>` plus `(bundled)` / `(cached)` tags.
pub fn asset_line(asset: &StagedAsset) -> String {
  let mut line = format!("{} {}", short_hash(&asset.asset_hash), asset.relative_path);
  if asset.bundled {
    line.push_str(" (bundled)");
  }
  if asset.cached {
    line.push_str(" (cached)");
  }
  line
}

fn stat(label: &str, value: impl std::fmt::Display) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// Human summary of a finished run. `verbose` lists every stack and asset.
pub fn print_assembly(assembly: &CloudAssembly, verbose: bool, elapsed: Duration) {
  let cached = assembly.assets.iter().filter(|a| a.cached).count();
  status(
    Status::Done,
    &format!("Synthesized {} stack(s) to {}", assembly.stacks.len(), assembly.outdir.display()),
  );
  stat("Stacks", assembly.stacks.len());
  stat("Assets staged", assembly.assets.len() - cached);
  stat("Assets cached", cached);

  if verbose {
    if !assembly.stacks.is_empty() {
      println!("\nStacks:");
      for stack in &assembly.stacks {
        println!("  {}", stack_line(stack));
      }
    }
    if !assembly.assets.is_empty() {
      println!("\nAssets:");
      for asset in &assembly.assets {
        println!("  {}", asset_line(asset));
      }
    }
  }
  stat("Elapsed", format_elapsed(elapsed));
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use synthkit_lib::asset::types::{Packaging, SourceKind};

  fn staged(cached: bool, bundled: bool) -> StagedAsset {
    let hash = "a".repeat(64);
    StagedAsset {
      relative_path: format!("asset.{hash}.zip"),
      staged_path: PathBuf::from(format!("cdk.out/asset.{hash}.zip")),
      asset_hash: hash,
      packaging: Packaging::Zip,
      is_archive: true,
      source_kind: SourceKind::Directory,
      cached,
      bundled,
    }
  }

  #[test]
  fn short_hash_keeps_twelve_characters() {
    assert_eq!(short_hash("0123456789abcdef"), "0123456789ab");
    assert_eq!(short_hash("abc"), "abc");
  }

  #[test]
  fn elapsed_picks_a_unit() {
    assert_eq!(format_elapsed(Duration::from_millis(50)), "50ms");
    assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.50s");
    assert_eq!(format_elapsed(Duration::from_secs(65)), "1m05s");
  }

  #[test]
  fn asset_lines_carry_state() {
    let hash = "a".repeat(64);
    assert_eq!(asset_line(&staged(false, false)), format!("aaaaaaaaaaaa asset.{hash}.zip"));
    assert_eq!(
      asset_line(&staged(true, true)),
      format!("aaaaaaaaaaaa asset.{hash}.zip (bundled) (cached)")
    );
  }
}
