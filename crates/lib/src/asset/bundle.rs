//! Bundling: turning an asset source into deployable output.
//!
//! A bundler first offers the work to an in-process [`LocalBundling`]
//! provider, if one is configured. Otherwise it runs the configured image
//! through the container program (`docker` or whatever `CDK_DOCKER` names)
//! with the source mounted read-only at `/asset-input` and an empty output
//! directory mounted at `/asset-output`.
//!
//! [`LocalBundling`]: super::types::LocalBundling

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::filter::{FilterError, FilterOptions, collect};
use super::types::{BundlingOptions, BundlingOutput, DockerImage, DockerVolume};
use crate::cancel::CancelSignal;
use crate::consts::{BUNDLING_GRACE_SECS, BUNDLING_INPUT_DIR, BUNDLING_OUTPUT_DIR, STDERR_TAIL_LINES};
use crate::error::{Classify, ErrorKind};
use crate::platform;
use crate::util::hash::{ContentHash, HashError, fingerprint, hash_bytes, xor_hashes};

const LOG_TARGET: &str = "synthkit::bundling";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BundleError {
  #[error("container program '{program}' was not found")]
  ContainerRuntimeMissing { program: String },

  #[error("bundling with image '{image}' failed with exit code {}:\n{stderr_tail}", exit_code(.code))]
  BundlingFailed {
    image: String,
    code: Option<i32>,
    stderr_tail: String,
  },

  #[error("could not prepare image '{image}': {message}")]
  Image { image: String, message: String },

  #[error("bundling produced no output in {dir}")]
  EmptyOutput { dir: String },

  #[error("bundling output in {dir} must be {expected}, found {found} entries")]
  UnexpectedOutput {
    dir: String,
    expected: &'static str,
    found: usize,
  },

  #[error("bundling was cancelled")]
  Cancelled,

  #[error("io error at {path}: {message}")]
  Io { path: String, message: String },

  #[error(transparent)]
  Filter(#[from] FilterError),

  #[error(transparent)]
  Hash(#[from] HashError),
}

impl Classify for BundleError {
  fn kind(&self) -> ErrorKind {
    match self {
      BundleError::ContainerRuntimeMissing { .. } => ErrorKind::ContainerRuntimeMissing,
      BundleError::BundlingFailed { .. }
      | BundleError::Image { .. }
      | BundleError::EmptyOutput { .. }
      | BundleError::UnexpectedOutput { .. } => ErrorKind::BundlingFailed,
      BundleError::Cancelled => ErrorKind::Cancelled,
      BundleError::Io { .. } => ErrorKind::FilesystemError,
      BundleError::Filter(e) => e.kind(),
      BundleError::Hash(e) => e.kind(),
    }
  }
}

fn exit_code(code: &Option<i32>) -> String {
  code.map(|c| c.to_string()).unwrap_or_else(|| "none (killed by signal)".to_string())
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> BundleError {
  BundleError::Io {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

/// What the bundler left behind, as interpreted by the output type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundledOutput {
  Directory(PathBuf),
  Archive(PathBuf),
  SingleFile(PathBuf),
}

#[derive(Serialize)]
struct BundlingFingerprint<'a> {
  image: &'a str,
  entrypoint: &'a Option<Vec<String>>,
  command: &'a Option<Vec<String>>,
  environment: &'a BTreeMap<String, String>,
  user: &'a Option<String>,
  working_directory: &'a Option<String>,
  volumes: &'a [DockerVolume],
  output_type: BundlingOutput,
  local: Option<String>,
}

/// Stable identity of an image. Built images are identified by their build
/// context fingerprint, Dockerfile and build arguments.
pub fn image_identity(image: &DockerImage) -> Result<String, BundleError> {
  match image {
    DockerImage::Registry { name } => Ok(name.clone()),
    DockerImage::Build { path, file, build_args } => {
      let context = fingerprint(&collect(path, &FilterOptions::default(), None)?)?;
      let args = serde_json::to_string(build_args).map_err(|e| HashError::Serialize { message: e.to_string() })?;
      Ok(format!("build:{context}:{}:{args}", file.as_deref().unwrap_or("Dockerfile")))
    }
  }
}

/// The BUNDLE fingerprint: the bundling configuration digest XOR the source fingerprint.
///
/// Everything that can change what lands in `/asset-output` is part of the
/// configuration digest. A local provider is identified by its `Debug` form.
pub fn bundle_key(options: &BundlingOptions, source_hash: &ContentHash) -> Result<ContentHash, BundleError> {
  let image = image_identity(&options.image)?;
  let stable = BundlingFingerprint {
    image: &image,
    entrypoint: &options.entrypoint,
    command: &options.command,
    environment: &options.environment,
    user: &options.user,
    working_directory: &options.working_directory,
    volumes: &options.volumes,
    output_type: options.output_type,
    local: options.local.as_ref().map(|local| format!("{local:?}")),
  };
  let json = serde_json::to_string(&stable).map_err(|e| HashError::Serialize { message: e.to_string() })?;
  Ok(xor_hashes(&hash_bytes(json.as_bytes()), source_hash)?)
}

/// Arguments for `<program> run ...`.
pub fn run_args(image_ref: &str, input_dir: &Path, output_dir: &Path, options: &BundlingOptions) -> Vec<String> {
  let user = options.user.clone().unwrap_or_else(platform::process_user);
  let mut args = vec!["run".to_string(), "--rm".to_string(), "-u".to_string(), user];

  args.push("-v".to_string());
  args.push(format!("{}:{BUNDLING_INPUT_DIR}:ro", input_dir.display()));
  args.push("-v".to_string());
  args.push(format!("{}:{BUNDLING_OUTPUT_DIR}:rw", output_dir.display()));
  for volume in &options.volumes {
    args.push("-v".to_string());
    args.push(format!("{}:{}", volume.host_path.display(), volume.container_path));
  }

  for (key, value) in &options.environment {
    args.push("-e".to_string());
    args.push(format!("{key}={value}"));
  }

  args.push("-w".to_string());
  args.push(
    options
      .working_directory
      .clone()
      .unwrap_or_else(|| BUNDLING_INPUT_DIR.to_string()),
  );

  let (entrypoint, entry_args) = match options.entrypoint.as_deref() {
    Some([first, rest @ ..]) => (Some(first.clone()), rest.to_vec()),
    _ => (None, Vec::new()),
  };
  if let Some(entrypoint) = entrypoint {
    args.push("--entrypoint".to_string());
    args.push(entrypoint);
  }

  args.push(image_ref.to_string());
  args.extend(entry_args);
  args.extend(options.command.iter().flatten().cloned());
  args
}

/// Interpret the contents of `dir` according to `output_type`.
pub fn classify_output(dir: &Path, output_type: BundlingOutput) -> Result<BundledOutput, BundleError> {
  let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
    .map_err(|e| io_err(dir, e))?
    .map(|entry| entry.map(|e| e.path()).map_err(|e| io_err(dir, e)))
    .collect::<Result<_, _>>()?;
  entries.sort();

  if entries.is_empty() {
    return Err(BundleError::EmptyOutput {
      dir: dir.display().to_string(),
    });
  }

  let single_file = match entries.as_slice() {
    [only] if only.is_file() => Some(only.clone()),
    _ => None,
  };
  let unexpected = |expected| BundleError::UnexpectedOutput {
    dir: dir.display().to_string(),
    expected,
    found: entries.len(),
  };

  match output_type {
    BundlingOutput::AutoDiscover => match single_file {
      Some(file) if is_archive(&file) => Ok(BundledOutput::Archive(file)),
      _ => Ok(BundledOutput::Directory(dir.to_path_buf())),
    },
    BundlingOutput::Archived => single_file
      .map(BundledOutput::Archive)
      .ok_or_else(|| unexpected("a single archive file")),
    BundlingOutput::SingleFile => single_file
      .map(BundledOutput::SingleFile)
      .ok_or_else(|| unexpected("a single file")),
    BundlingOutput::NotArchived => Ok(BundledOutput::Directory(dir.to_path_buf())),
  }
}

/// Whether a file name carries an archive extension.
pub fn is_archive(path: &Path) -> bool {
  matches!(
    path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
    Some("zip" | "jar")
  )
}

/// Runs bundling work on behalf of the prepare phase.
#[derive(Debug, Clone)]
pub struct Bundler {
  program: String,
  grace: Duration,
  cancel: CancelSignal,
}

impl Bundler {
  pub fn new(program: impl Into<String>, cancel: CancelSignal) -> Self {
    Self {
      program: program.into(),
      grace: Duration::from_secs(BUNDLING_GRACE_SECS),
      cancel,
    }
  }

  pub fn with_grace(mut self, grace: Duration) -> Self {
    self.grace = grace;
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  /// Bundle `input_dir` into the empty `output_dir`.
  pub async fn bundle(&self, options: &BundlingOptions, input_dir: &Path, output_dir: &Path) -> Result<(), BundleError> {
    if let Some(local) = &options.local {
      let local = local.clone();
      let (input, output) = (input_dir.to_path_buf(), output_dir.to_path_buf());
      let handled = tokio::task::spawn_blocking(move || local.try_bundle(&input, &output))
        .await
        .unwrap_or_else(|e| {
          warn!(error = %e, "local bundling panicked; falling back to the container");
          false
        });
      if handled {
        info!(input = %input_dir.display(), "bundled locally");
        return Ok(());
      }
      debug!("local bundling declined");
    }

    let image_ref = self.prepare_image(&options.image).await?;
    let args = run_args(&image_ref, input_dir, output_dir, options);
    info!(image = %image_ref, input = %input_dir.display(), "bundling in container");
    self.run_streaming(&args, &image_ref).await
  }

  /// Make sure the image exists locally and return the reference to run.
  async fn prepare_image(&self, image: &DockerImage) -> Result<String, BundleError> {
    match image {
      DockerImage::Registry { name } => {
        let inspect = self.capture(&["image", "inspect", name.as_str()]).await?;
        if inspect.status.success() {
          return Ok(name.clone());
        }
        info!(image = %name, "pulling image");
        let pull = self.capture(&["pull", name.as_str()]).await?;
        if !pull.status.success() {
          return Err(BundleError::Image {
            image: name.clone(),
            message: String::from_utf8_lossy(&pull.stderr).trim().to_string(),
          });
        }
        Ok(name.clone())
      }
      DockerImage::Build { path, file, build_args } => {
        let mut args = vec!["build".to_string(), "-q".to_string()];
        for (key, value) in build_args {
          args.push("--build-arg".to_string());
          args.push(format!("{key}={value}"));
        }
        if let Some(file) = file {
          args.push("--file".to_string());
          args.push(path.join(file).display().to_string());
        }
        args.push(path.display().to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.capture(&arg_refs).await?;
        let label = image.to_string();
        if !output.status.success() {
          return Err(BundleError::Image {
            image: label,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
          });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
          .lines()
          .rev()
          .map(str::trim)
          .find(|l| !l.is_empty())
          .map(str::to_string)
          .ok_or_else(|| BundleError::Image {
            image: label,
            message: "build printed no image id".to_string(),
          })
      }
    }
  }

  fn command(&self, args: &[&str]) -> Command {
    let mut command = Command::new(&self.program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    command
  }

  fn spawn_error(&self, e: std::io::Error) -> BundleError {
    if e.kind() == std::io::ErrorKind::NotFound {
      BundleError::ContainerRuntimeMissing {
        program: self.program.clone(),
      }
    } else {
      BundleError::Io {
        path: self.program.clone(),
        message: e.to_string(),
      }
    }
  }

  async fn capture(&self, args: &[&str]) -> Result<Output, BundleError> {
    debug!(program = %self.program, args = ?args, "running container program");
    let mut command = self.command(args);
    tokio::select! {
      output = command.output() => output.map_err(|e| self.spawn_error(e)),
      _ = self.cancel.cancelled() => Err(BundleError::Cancelled),
    }
  }

  async fn run_streaming(&self, args: &[String], image: &str) -> Result<(), BundleError> {
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let mut child = self
      .command(&arg_refs)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| self.spawn_error(e))?;

    let stdout = child.stdout.take().map(|out| tokio::spawn(forward_lines(out, "stdout", 0)));
    let stderr = child
      .stderr
      .take()
      .map(|err| tokio::spawn(forward_lines(err, "stderr", STDERR_TAIL_LINES)));

    let status = tokio::select! {
      status = child.wait() => Some(status),
      _ = self.cancel.cancelled() => None,
    };

    let Some(status) = status else {
      terminate(&mut child, self.grace).await;
      return Err(BundleError::Cancelled);
    };
    let status = status.map_err(|e| self.spawn_error(e))?;

    if let Some(task) = stdout {
      let _ = task.await;
    }
    let tail = match stderr {
      Some(task) => task.await.unwrap_or_default(),
      None => VecDeque::new(),
    };

    if !status.success() {
      return Err(BundleError::BundlingFailed {
        image: image.to_string(),
        code: status.code(),
        stderr_tail: Vec::from(tail).join("\n"),
      });
    }
    Ok(())
  }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
  let Some(pid) = child.id().and_then(|id| rustix::process::Pid::from_raw(id as i32)) else {
    return;
  };
  if let Err(e) = rustix::process::kill_process(pid, rustix::process::Signal::TERM) {
    debug!(error = %e, "failed to signal container client");
  }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

/// Forward each line to the log, keeping the last `keep` lines.
async fn forward_lines<R>(reader: R, stream: &'static str, keep: usize) -> VecDeque<String>
where
  R: AsyncRead + Unpin,
{
  let mut lines = BufReader::new(reader).lines();
  let mut tail = VecDeque::with_capacity(keep);
  while let Ok(Some(line)) = lines.next_line().await {
    info!(target: LOG_TARGET, stream, "{line}");
    if keep > 0 {
      if tail.len() == keep {
        tail.pop_front();
      }
      tail.push_back(line);
    }
  }
  tail
}

/// SIGTERM, wait out the grace period, then kill.
async fn terminate(child: &mut Child, grace: Duration) {
  send_sigterm(child);

  if tokio::time::timeout(grace, child.wait()).await.is_err() {
    warn!(grace_secs = grace.as_secs(), "container client ignored SIGTERM; killing it");
    if let Err(e) = child.kill().await {
      debug!(error = %e, "failed to kill container client");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::write_tree;
  use tempfile::tempdir;

  fn options() -> BundlingOptions {
    BundlingOptions::new(DockerImage::from_registry("node:20"))
  }

  mod args {
    use super::*;

    #[test]
    fn run_args_follow_the_container_contract() {
      let mut opts = options().with_command(["npm", "run", "build"]).with_env("Z", "1").with_env("A", "2");
      opts.user = Some("501:20".to_string());
      let args = run_args("node:20", Path::new("/src"), Path::new("/out"), &opts);

      assert_eq!(
        args,
        vec![
          "run",
          "--rm",
          "-u",
          "501:20",
          "-v",
          "/src:/asset-input:ro",
          "-v",
          "/out:/asset-output:rw",
          "-e",
          "A=2",
          "-e",
          "Z=1",
          "-w",
          "/asset-input",
          "node:20",
          "npm",
          "run",
          "build",
        ]
      );
    }

    #[test]
    fn entrypoint_is_split_around_the_image() {
      let mut opts = options().with_command(["x"]);
      opts.entrypoint = Some(vec!["/bin/sh".to_string(), "-c".to_string()]);
      opts.working_directory = Some("/work".to_string());
      let args = run_args("img", Path::new("/src"), Path::new("/out"), &opts);

      let tail: Vec<&str> = args.iter().skip_while(|a| *a != "-w").map(String::as_str).collect();
      assert_eq!(tail, vec!["-w", "/work", "--entrypoint", "/bin/sh", "img", "-c", "x"]);
    }

    #[test]
    fn default_user_is_the_invoking_user() {
      let args = run_args("img", Path::new("/src"), Path::new("/out"), &options());
      assert_eq!(args[3], platform::process_user());
    }
  }

  mod key {
    use super::*;

    #[test]
    fn key_changes_with_command_and_source() {
      let source_a = hash_bytes(b"a");
      let source_b = hash_bytes(b"b");
      let one = options().with_command(["one"]);
      let two = options().with_command(["two"]);

      let base = bundle_key(&one, &source_a).unwrap();
      assert_eq!(base, bundle_key(&one, &source_a).unwrap());
      assert_ne!(base, bundle_key(&two, &source_a).unwrap());
      assert_ne!(base, bundle_key(&one, &source_b).unwrap());
    }

    #[test]
    fn key_covers_every_container_setting() {
      let source = hash_bytes(b"a");
      let base = bundle_key(&options(), &source).unwrap();

      let mut user = options();
      user.user = Some("0:0".to_string());
      let mut workdir = options();
      workdir.working_directory = Some("/work".to_string());
      let mut volumes = options();
      volumes.volumes.push(DockerVolume {
        host_path: PathBuf::from("/cache"),
        container_path: "/root/.cache".to_string(),
      });

      for changed in [user, workdir, volumes] {
        assert_ne!(base, bundle_key(&changed, &source).unwrap());
      }
    }

    #[test]
    fn build_images_are_keyed_by_context() {
      let ctx = tempdir().unwrap();
      write_tree(ctx.path(), &[("Dockerfile", "FROM alpine")]);
      let image = DockerImage::from_build(ctx.path());
      let before = image_identity(&image).unwrap();

      write_tree(ctx.path(), &[("Dockerfile", "FROM debian")]);
      assert_ne!(before, image_identity(&image).unwrap());
    }
  }

  mod output {
    use super::*;

    #[test]
    fn empty_output_is_an_error() {
      let dir = tempdir().unwrap();
      let err = classify_output(dir.path(), BundlingOutput::AutoDiscover).unwrap_err();
      assert!(matches!(err, BundleError::EmptyOutput { .. }));
      assert_eq!(err.kind(), ErrorKind::BundlingFailed);
    }

    #[test]
    fn auto_discover_detects_single_archive() {
      let dir = tempdir().unwrap();
      write_tree(dir.path(), &[("bundle.JAR", "x")]);
      assert_eq!(
        classify_output(dir.path(), BundlingOutput::AutoDiscover).unwrap(),
        BundledOutput::Archive(dir.path().join("bundle.JAR"))
      );
    }

    #[test]
    fn auto_discover_treats_other_files_as_directory() {
      let dir = tempdir().unwrap();
      write_tree(dir.path(), &[("index.js", "x")]);
      assert_eq!(
        classify_output(dir.path(), BundlingOutput::AutoDiscover).unwrap(),
        BundledOutput::Directory(dir.path().to_path_buf())
      );
    }

    #[test]
    fn single_file_requires_exactly_one_file() {
      let dir = tempdir().unwrap();
      write_tree(dir.path(), &[("a.bin", "x"), ("b.bin", "y")]);
      assert!(matches!(
        classify_output(dir.path(), BundlingOutput::SingleFile),
        Err(BundleError::UnexpectedOutput { found: 2, .. })
      ));
      assert_eq!(
        classify_output(dir.path(), BundlingOutput::NotArchived).unwrap(),
        BundledOutput::Directory(dir.path().to_path_buf())
      );
    }
  }

  #[cfg(unix)]
  mod container {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::util::testutil::{fake_container, fake_container_runs};

    #[tokio::test]
    async fn runs_the_container_and_collects_output() {
      let bin = tempdir().unwrap();
      let program = fake_container(bin.path(), r#"echo built > "$OUT/out.txt"; echo working"#);
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();

      let bundler = Bundler::new(program.display().to_string(), CancelSignal::never());
      bundler.bundle(&options(), src.path(), out.path()).await.unwrap();

      assert_eq!(std::fs::read_to_string(out.path().join("out.txt")).unwrap(), "built\n");
      assert_eq!(fake_container_runs(bin.path()), 1);
    }

    #[tokio::test]
    async fn failure_reports_exit_code_and_stderr_tail() {
      let bin = tempdir().unwrap();
      let program = fake_container(bin.path(), r#"i=0; while [ $i -lt 30 ]; do echo "line $i" >&2; i=$((i+1)); done; exit 3"#);
      let dirs = (tempdir().unwrap(), tempdir().unwrap());

      let bundler = Bundler::new(program.display().to_string(), CancelSignal::never());
      let err = bundler.bundle(&options(), dirs.0.path(), dirs.1.path()).await.unwrap_err();

      let BundleError::BundlingFailed { code, stderr_tail, .. } = &err else {
        panic!("unexpected error {err:?}");
      };
      assert_eq!(*code, Some(3));
      let lines: Vec<&str> = stderr_tail.lines().collect();
      assert_eq!(lines.len(), STDERR_TAIL_LINES);
      assert_eq!(lines.first(), Some(&"line 10"));
      assert_eq!(lines.last(), Some(&"line 29"));
      assert_eq!(err.kind(), ErrorKind::BundlingFailed);
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
      let bundler = Bundler::new("/definitely/not/a/container/runtime", CancelSignal::never());
      let dirs = (tempdir().unwrap(), tempdir().unwrap());
      let err = bundler.bundle(&options(), dirs.0.path(), dirs.1.path()).await.unwrap_err();
      assert_eq!(err.kind(), ErrorKind::ContainerRuntimeMissing);
    }

    #[tokio::test]
    async fn cancellation_terminates_the_container() {
      let bin = tempdir().unwrap();
      let program = fake_container(bin.path(), "sleep 30");
      let dirs = (tempdir().unwrap(), tempdir().unwrap());
      let (handle, signal) = cancel_pair();

      let bundler = Bundler::new(program.display().to_string(), signal).with_grace(Duration::from_millis(200));
      let opts = options();
      let run = bundler.bundle(&opts, dirs.0.path(), dirs.1.path());
      let cancel = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
      };
      let (result, ()) = tokio::time::timeout(Duration::from_secs(10), async { tokio::join!(run, cancel) })
        .await
        .expect("cancelled bundling should return promptly");
      assert_eq!(result.unwrap_err(), BundleError::Cancelled);
    }

    #[derive(Debug)]
    struct WritesMarker;

    impl crate::asset::types::LocalBundling for WritesMarker {
      fn try_bundle(&self, _input: &Path, output: &Path) -> bool {
        std::fs::write(output.join("local.txt"), "local").is_ok()
      }
    }

    #[tokio::test]
    async fn local_bundling_skips_the_container() {
      let bin = tempdir().unwrap();
      let program = fake_container(bin.path(), "exit 1");
      let dirs = (tempdir().unwrap(), tempdir().unwrap());
      let mut opts = options();
      opts.local = Some(std::sync::Arc::new(WritesMarker));

      let bundler = Bundler::new(program.display().to_string(), CancelSignal::never());
      bundler.bundle(&opts, dirs.0.path(), dirs.1.path()).await.unwrap();
      assert!(dirs.1.path().join("local.txt").exists());
      assert_eq!(fake_container_runs(bin.path()), 0);
    }
  }
}
