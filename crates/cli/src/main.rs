mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::synth::SynthArgs;

/// synth - synthesize Lua-defined apps into cloud assemblies
#[derive(Parser)]
#[command(name = "synth")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Evaluate an app and write its cloud assembly
  Synth(SynthArgs),

  /// List the stacks an app defines
  Ls {
    /// Path to the app script
    #[arg(default_value = "app.lua")]
    app: PathBuf,

    /// Context values (key=value), overriding CDK_CONTEXT_JSON
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// Print as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the construct tree of an app
  Tree {
    /// Path to the app script
    #[arg(default_value = "app.lua")]
    app: PathBuf,

    /// Context values (key=value), overriding CDK_CONTEXT_JSON
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// Print as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the source fingerprint of a file or directory
  Hash {
    /// File or directory to fingerprint
    path: PathBuf,

    /// Glob patterns to exclude (repeatable)
    #[arg(short = 'e', long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,

    /// How exclude patterns are interpreted: glob, git or docker
    #[arg(long, default_value = "glob")]
    ignore_mode: String,

    /// Symlink policy: never, always, external, block_external
    #[arg(long, default_value = "never")]
    follow: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Synth(args) => cmd::cmd_synth(args, cli.verbose),
    Commands::Ls { app, context, json } => cmd::cmd_ls(&app, &context, json),
    Commands::Tree { app, context, json } => cmd::cmd_tree(&app, &context, json),
    Commands::Hash {
      path,
      exclude,
      ignore_mode,
      follow,
    } => cmd::cmd_hash(&path, exclude, &ignore_mode, &follow),
  }
}
