//! Test utilities for synthkit-lib.
//!
//! Filesystem fixture builders plus a fake container program for bundling
//! tests that must not depend on a real container runtime.

use std::fs;
use std::path::{Path, PathBuf};

/// Write `(relative path, contents)` pairs under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (rel, contents) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
  }
}

/// Cross-platform symlink creation helper
pub fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
  #[cfg(unix)]
  {
    std::os::unix::fs::symlink(target, link)
  }
  #[cfg(windows)]
  {
    if target.is_dir() {
      std::os::windows::fs::symlink_dir(target, link)
    } else {
      std::os::windows::fs::symlink_file(target, link)
    }
  }
}

/// Writes an executable `/bin/sh` script standing in for the container program.
///
/// The script receives the full argument vector the bundler passes to
/// `docker`. `image inspect`, `pull` and `build` succeed silently (`build`
/// prints a fake image id); `run` executes `run_body` with `$OUT` bound to the
/// host directory mounted at `/asset-output` and `$IN` to the one mounted at
/// `/asset-input`. Each `run` appends a line to `<dir>/runs.log`.
#[cfg(unix)]
pub fn fake_container(dir: &Path, run_body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let log = dir.join("runs.log");
  let script = format!(
    r#"#!/bin/sh
case "$1" in
  image|pull) exit 0 ;;
  build) echo "sha256:fakeimage"; exit 0 ;;
  run) ;;
  *) echo "unexpected command $1" >&2; exit 64 ;;
esac
IN=""
OUT=""
while [ $# -gt 0 ]; do
  case "$1" in
    -v)
      case "$2" in
        *:/asset-input:*) IN="${{2%%:/asset-input:*}}" ;;
        *:/asset-output:*) OUT="${{2%%:/asset-output:*}}" ;;
      esac
      shift 2 ;;
    *) shift ;;
  esac
done
echo run >> "{log}"
{run_body}
"#,
    log = log.display(),
    run_body = run_body,
  );
  let path = dir.join("fake-docker");
  fs::write(&path, script).unwrap();
  fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// Number of `run` invocations recorded by [`fake_container`].
#[cfg(unix)]
pub fn fake_container_runs(dir: &Path) -> usize {
  fs::read_to_string(dir.join("runs.log"))
    .map(|s| s.lines().count())
    .unwrap_or(0)
}
