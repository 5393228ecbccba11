//! CLI smoke tests for synth.
//!
//! These tests run the binary end to end against small Lua apps in a
//! temporary directory and check exit codes, output and the files written.

use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the synth binary, isolated from the caller's env.
fn synth_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("synth");
  cmd.env_remove("CDK_CONTEXT_JSON").env_remove("CDK_OUTDIR");
  cmd
}

/// Create a temp directory holding `app.lua` plus extra files.
fn temp_app(script: &str, files: &[(&str, &str)]) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("app.lua"), script).unwrap();
  for (rel, contents) in files {
    let path = temp.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
  }
  temp
}

fn read_json(path: &Path) -> serde_json::Value {
  serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// One stack with a directory asset wired into a function.
const ASSET_APP: &str = r#"
local stack = cdk.stack(cdk.app, "Web")
local code = cdk.asset(stack, "Code", { path = "handler", exclude = { "*.md" } })
local fn = cdk.resource(stack, "Handler", {
  type = "AWS::Lambda::Function",
  properties = {
    Code = { S3Bucket = code.s3_bucket_name, S3Key = code.s3_object_key },
    Runtime = "nodejs20.x",
  },
})
code:add_resource_metadata(fn, "Code")
"#;

const ASSET_FILES: &[(&str, &str)] = &[("handler/index.js", "exports.handler = async () => 1;"), ("handler/README.md", "docs")];

const TWO_STACKS: &str = r#"
cdk.stack(cdk.app, "Alpha")
local beta = cdk.stack(cdk.app, "Beta")
cdk.resource(beta, "Topic", { type = "AWS::SNS::Topic" })
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  synth_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["synth", "ls", "tree", "hash"] {
    synth_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// synth
// =============================================================================

#[test]
#[serial]
fn synth_writes_the_cloud_assembly() {
  let temp = temp_app(ASSET_APP, ASSET_FILES);
  let out = temp.path().join("cdk.out");

  synth_cmd()
    .arg("synth")
    .arg(temp.path().join("app.lua"))
    .arg("-o")
    .arg(&out)
    .assert()
    .success()
    .stdout(predicate::str::contains("Synthesized 1 stack(s)"));

  let template = read_json(&out.join("Web.template.json"));
  let parameters = template["Parameters"].as_object().unwrap();
  assert_eq!(parameters.len(), 2);
  let handler = &template["Resources"]["Handler"];
  assert_eq!(handler["Metadata"]["aws:cdk:path"], "Web/Handler");
  assert_eq!(handler["Metadata"]["aws:asset:property"], "Code");

  let manifest = read_json(&out.join("manifest.json"));
  assert_eq!(manifest["artifacts"]["Web"]["type"], "aws:cloudformation:stack");
  let asset_path = manifest["assets"][0]["path"].as_str().unwrap().to_string();
  assert!(asset_path.ends_with(".zip"), "{asset_path}");
  assert!(out.join(&asset_path).is_file());
  assert!(out.join("tree.json").is_file());
}

#[test]
#[serial]
fn synth_twice_reuses_staged_assets() {
  let temp = temp_app(ASSET_APP, ASSET_FILES);
  let out = temp.path().join("cdk.out");
  let run = || {
    synth_cmd()
      .arg("synth")
      .arg(temp.path().join("app.lua"))
      .arg("-o")
      .arg(&out)
      .arg("--json")
      .output()
      .unwrap()
  };

  let first = run();
  assert!(first.status.success());
  let first: serde_json::Value = serde_json::from_slice(&first.stdout).unwrap();
  assert_eq!(first["assets"][0]["cached"], false);

  let second = run();
  assert!(second.status.success());
  let second: serde_json::Value = serde_json::from_slice(&second.stdout).unwrap();
  assert_eq!(second["assets"][0]["cached"], true);
  assert_eq!(first["assets"][0]["hash"], second["assets"][0]["hash"]);
}

#[test]
#[serial]
fn synth_context_disables_path_metadata() {
  let temp = temp_app(ASSET_APP, ASSET_FILES);
  let out = temp.path().join("cdk.out");

  synth_cmd()
    .arg("synth")
    .arg(temp.path().join("app.lua"))
    .arg("-o")
    .arg(&out)
    .arg("-c")
    .arg("aws:cdk:enable-path-metadata=false")
    .assert()
    .success();

  let template = read_json(&out.join("Web.template.json"));
  assert!(template["Resources"]["Handler"]["Metadata"].get("aws:cdk:path").is_none());
}

#[test]
#[serial]
fn synth_reports_construct_errors() {
  let temp = temp_app(
    r#"
    local stack = cdk.stack(cdk.app, "Web")
    cdk.asset(stack, "Code", { path = "missing" })
    "#,
    &[],
  );

  synth_cmd()
    .arg("synth")
    .arg(temp.path().join("app.lua"))
    .arg("-o")
    .arg(temp.path().join("cdk.out"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("error[InvalidArgument] at Web/Code"));
}

#[test]
#[serial]
fn synth_nonexistent_app_fails() {
  let temp = TempDir::new().unwrap();

  synth_cmd()
    .arg("synth")
    .arg("/nonexistent/path/app.lua")
    .arg("-o")
    .arg(temp.path().join("cdk.out"))
    .assert()
    .failure();
}

// =============================================================================
// ls & tree
// =============================================================================

#[test]
#[serial]
fn ls_lists_stacks_in_order() {
  let temp = temp_app(TWO_STACKS, &[]);

  synth_cmd()
    .arg("ls")
    .arg(temp.path().join("app.lua"))
    .assert()
    .success()
    .stdout(predicate::str::diff("Alpha\nBeta\n"));
}

#[test]
#[serial]
fn tree_prints_nodes_with_kinds() {
  let temp = temp_app(TWO_STACKS, &[]);

  synth_cmd()
    .arg("tree")
    .arg(temp.path().join("app.lua"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Beta"))
    .stdout(predicate::str::contains("  Topic"))
    .stdout(predicate::str::contains("(resource)"));
}

// =============================================================================
// hash
// =============================================================================

#[test]
fn hash_respects_excludes() {
  let temp = temp_app("", ASSET_FILES);
  let hash = |extra: &[&str]| {
    let output = synth_cmd()
      .arg("hash")
      .arg(temp.path().join("handler"))
      .args(extra)
      .output()
      .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap().trim().to_string()
  };

  let all = hash(&[]);
  let without_docs = hash(&["--exclude", "*.md"]);
  assert_eq!(all.len(), 64);
  assert_ne!(all, without_docs);
}

#[test]
fn hash_rejects_unknown_modes() {
  let temp = temp_app("", ASSET_FILES);

  synth_cmd()
    .arg("hash")
    .arg(temp.path().join("handler"))
    .arg("--ignore-mode")
    .arg("svn")
    .assert()
    .failure()
    .stderr(predicate::str::contains("ignore mode"));
}
