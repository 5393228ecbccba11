//! Implementation of the `synth synth` command.
//!
//! Evaluates an app script, prepares its assets and writes templates,
//! `manifest.json` and `tree.json` to the output directory. Ctrl-C cancels
//! the run; assets already staged are kept for the next one.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use serde_json::json;
use tracing::debug;

use synthkit_lib::asset::stage::DirectoryPackaging;
use synthkit_lib::cancel::cancel_pair;
use synthkit_lib::synth::{CloudAssembly, SynthConfig, SynthOutcome, synthesize};

use super::load_app;
use crate::output::{Status, print_assembly, print_diagnostic, print_json, status};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum PackagingArg {
  /// Zip directories into `asset.<hash>.zip`
  #[default]
  Zip,
  /// Copy directories to `asset.<hash>/`
  Copy,
}

#[derive(Debug, Args)]
pub struct SynthArgs {
  /// Path to the app script
  #[arg(default_value = "app.lua")]
  pub app: PathBuf,

  /// Output directory (default: CDK_OUTDIR or cdk.out)
  #[arg(short = 'o', long = "outdir")]
  pub outdir: Option<PathBuf>,

  /// Context values (key=value), overriding CDK_CONTEXT_JSON
  #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
  pub context: Vec<String>,

  /// Maximum number of assets prepared at once
  #[arg(short = 'j', long = "jobs")]
  pub jobs: Option<usize>,

  /// How directory assets are staged
  #[arg(long, value_enum, default_value_t = PackagingArg::Zip)]
  pub packaging: PackagingArg,

  /// Fail when staged content under a custom hash differs from what is
  /// already in the output directory
  #[arg(long)]
  pub verify_custom_hashes: bool,

  /// Print the summary as JSON
  #[arg(long)]
  pub json: bool,
}

pub fn cmd_synth(args: SynthArgs, verbose: bool) -> Result<()> {
  let started = Instant::now();
  let mut app = load_app(&args.app, &args.context)?;

  let (cancel_handle, cancel) = cancel_pair();
  let mut config = SynthConfig {
    cancel,
    verify_custom_hashes: args.verify_custom_hashes,
    directory_packaging: match args.packaging {
      PackagingArg::Zip => DirectoryPackaging::Zip,
      PackagingArg::Copy => DirectoryPackaging::Copy,
    },
    ..SynthConfig::default()
  };
  if let Some(outdir) = args.outdir {
    config.outdir = outdir;
  }
  if let Some(jobs) = args.jobs {
    config.parallelism = jobs.max(1);
  }
  debug!(outdir = %config.outdir.display(), parallelism = config.parallelism, "starting synthesis");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(async {
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        cancel_handle.cancel();
      }
    });
    synthesize(&mut app, &config).await
  });

  let assembly = match outcome {
    Ok(SynthOutcome::Complete(assembly)) => assembly,
    Ok(SynthOutcome::Cancelled) => {
      status(Status::Warning, "Synthesis cancelled; no templates were written");
      std::process::exit(130);
    }
    Err(e) => {
      for diagnostic in e.diagnostics() {
        print_diagnostic(&diagnostic);
      }
      bail!("Synthesis failed: {}", e);
    }
  };

  if args.json {
    print_json(&summary_json(&assembly))?;
  } else {
    print_assembly(&assembly, verbose, started.elapsed());
  }
  Ok(())
}

fn summary_json(assembly: &CloudAssembly) -> serde_json::Value {
  let stacks: Vec<_> = assembly
    .stacks
    .iter()
    .map(|s| json!({ "name": s.name, "template": s.template_path }))
    .collect();
  let assets: Vec<_> = assembly
    .assets
    .iter()
    .map(|a| {
      json!({
        "hash": a.asset_hash,
        "path": a.relative_path,
        "packaging": a.packaging,
        "cached": a.cached,
        "bundled": a.bundled,
      })
    })
    .collect();
  json!({ "outdir": assembly.outdir, "stacks": stacks, "assets": assets })
}
