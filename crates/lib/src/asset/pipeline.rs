//! Preparing one asset: filter, fingerprint, optionally bundle, stage.
//!
//! All filesystem work runs on the blocking pool; only the container run
//! suspends on the async runtime.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{debug, info};

use super::AssetError;
use super::bundle::{BundledOutput, Bundler, bundle_key, classify_output, is_archive};
use super::filter::{FilterOptions, FilteredEntry, collect};
use super::stage::{DirectoryPackaging, Staged, stage_file, stage_tree};
use super::types::{AssetHashType, AssetSource, BundlingOptions, Packaging, SourceKind, StagedAsset};
use crate::cancel::CancelSignal;
use crate::consts::BUNDLING_TEMP_PREFIX;
use crate::util::hash::{ContentHash, HashError, fingerprint, hash_bytes};

/// Shared state for every asset prepared in one synthesis run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
  /// Where staged objects and bundling directories live.
  pub staging_root: PathBuf,
  pub bundler: Bundler,
  pub packaging: DirectoryPackaging,
  /// Rebuild and compare content committed under an existing custom hash.
  pub verify_custom_hashes: bool,
  pub cancel: CancelSignal,
}

impl PipelineContext {
  fn verify(&self, source: &AssetSource) -> bool {
    self.verify_custom_hashes && source.hash_type == AssetHashType::Custom
  }
}

async fn blocking<T, F>(f: F) -> Result<T, AssetError>
where
  F: FnOnce() -> Result<T, AssetError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(f).await.map_err(|e| AssetError::Task {
    message: e.to_string(),
  })?
}

fn custom_hash(source: &AssetSource) -> Result<ContentHash, AssetError> {
  let value = source.custom_hash.as_deref().ok_or_else(|| HashError::Serialize {
    message: "custom hash type without a hash value".to_string(),
  })?;
  Ok(hash_bytes(value.as_bytes()))
}

/// Run the whole pipeline for `source` and return what was staged.
pub async fn prepare_asset(source: &AssetSource, ctx: &PipelineContext) -> Result<StagedAsset, AssetError> {
  if ctx.cancel.is_cancelled() {
    return Err(AssetError::Cancelled);
  }
  match &source.bundling {
    None => prepare_source(source, ctx).await,
    Some(_) => prepare_bundled(source, ctx).await,
  }
}

async fn prepare_source(source: &AssetSource, ctx: &PipelineContext) -> Result<StagedAsset, AssetError> {
  let (src, root, ctx_owned) = (source.clone(), ctx.staging_root.clone(), ctx.clone());
  blocking(move || {
    let entries = collect(&src.path, &src.filter, Some(&root))?;
    let hash = match src.hash_type {
      AssetHashType::Custom => custom_hash(&src)?,
      _ => fingerprint(&entries)?,
    };
    debug!(path = %src.path.display(), hash = %hash, entries = entries.len(), "fingerprinted asset source");

    let verify = ctx_owned.verify(&src);
    let (staged, packaging, archive) = match src.kind {
      SourceKind::File => (
        stage_file(&root, hash.as_str(), &src.path, verify)?,
        Packaging::File,
        is_archive(&src.path),
      ),
      SourceKind::Directory => (
        stage_tree(&root, hash.as_str(), &entries, ctx_owned.packaging, verify, &ctx_owned.cancel)?,
        Packaging::Zip,
        true,
      ),
    };
    Ok(staged_asset(hash, staged, packaging, archive, src.kind, false))
  })
  .await
}

async fn prepare_bundled(source: &AssetSource, ctx: &PipelineContext) -> Result<StagedAsset, AssetError> {
  let Some(options) = source.bundling.clone() else {
    return prepare_source(source, ctx).await;
  };

  let (src, root, opts) = (source.clone(), ctx.staging_root.clone(), options.clone());
  let (source_hash, key) = blocking(move || {
    let entries = collect(&src.path, &src.filter, Some(&root))?;
    let source_hash = fingerprint(&entries)?;
    let key = bundle_key(&opts, &source_hash)?;
    Ok((source_hash, key))
  })
  .await?;

  let bundle_dir = ctx.staging_root.join(format!("{BUNDLING_TEMP_PREFIX}{key}"));
  if is_populated(&bundle_dir) {
    info!(dir = %bundle_dir.display(), "reusing bundling output");
  } else {
    bundle_into(&options, source, ctx, &key, &bundle_dir).await?;
  }

  let (src, ctx_owned) = (source.clone(), ctx.clone());
  blocking(move || {
    let output = classify_output(&bundle_dir, options.output_type)?;
    let hash = match src.hash_type {
      AssetHashType::Source => source_hash,
      AssetHashType::Bundle => key,
      AssetHashType::Output => fingerprint(&collect(&bundle_dir, &FilterOptions::default(), None)?)?,
      AssetHashType::Custom => custom_hash(&src)?,
    };
    debug!(path = %src.path.display(), hash = %hash, output = ?output, "bundled asset");

    let root = &ctx_owned.staging_root;
    let verify = ctx_owned.verify(&src);
    let (staged, packaging, archive) = match &output {
      BundledOutput::Directory(dir) => {
        let entries: Vec<FilteredEntry> = collect(dir, &FilterOptions::default(), None)?;
        let staged = stage_tree(root, hash.as_str(), &entries, ctx_owned.packaging, verify, &ctx_owned.cancel)?;
        (staged, Packaging::Zip, true)
      }
      BundledOutput::Archive(file) => (stage_file(root, hash.as_str(), file, verify)?, Packaging::File, true),
      BundledOutput::SingleFile(file) => (stage_file(root, hash.as_str(), file, verify)?, Packaging::File, is_archive(file)),
    };
    Ok(staged_asset(hash, staged, packaging, archive, src.kind, true))
  })
  .await
}

fn staged_asset(
  hash: ContentHash,
  staged: Staged,
  packaging: Packaging,
  is_archive: bool,
  source_kind: SourceKind,
  bundled: bool,
) -> StagedAsset {
  StagedAsset {
    asset_hash: hash.0,
    relative_path: staged.file_name,
    staged_path: staged.path,
    packaging,
    is_archive,
    source_kind,
    cached: staged.cached,
    bundled,
  }
}

fn is_populated(dir: &Path) -> bool {
  fs::read_dir(dir).map(|mut entries| entries.next().is_some()).unwrap_or(false)
}

/// Bundle into a private temporary directory, then rename it onto
/// `bundle_dir`. Only finished output is ever published there; if another
/// writer got there first its copy is kept and ours is dropped.
async fn bundle_into(
  options: &BundlingOptions,
  source: &AssetSource,
  ctx: &PipelineContext,
  key: &ContentHash,
  bundle_dir: &Path,
) -> Result<(), AssetError> {
  let tmp = Builder::new()
    .prefix(&format!(".{BUNDLING_TEMP_PREFIX}{key}-"))
    .tempdir_in(&ctx.staging_root)
    .map_err(|e| io_error(&ctx.staging_root, e))?;
  ctx.bundler.bundle(options, &source.path, tmp.path()).await?;
  if ctx.cancel.is_cancelled() {
    return Err(AssetError::Cancelled);
  }

  if is_populated(bundle_dir) {
    debug!(dir = %bundle_dir.display(), "another writer published this bundle first");
    return Ok(());
  }
  match fs::rename(tmp.path(), bundle_dir) {
    Ok(()) => {
      debug!(dir = %bundle_dir.display(), "published bundling output");
      Ok(())
    }
    Err(_) if is_populated(bundle_dir) => {
      debug!(dir = %bundle_dir.display(), "another writer published this bundle first");
      Ok(())
    }
    Err(e) => Err(io_error(bundle_dir, e)),
  }
}

fn io_error(path: &Path, e: std::io::Error) -> AssetError {
  AssetError::Io {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::asset::types::{BundlingOutput, DockerImage};
  use crate::error::{Classify, ErrorKind};
  use crate::util::testutil::write_tree;
  use tempfile::tempdir;

  fn source_of(path: &Path, kind: SourceKind) -> AssetSource {
    AssetSource {
      path: path.to_path_buf(),
      kind,
      filter: FilterOptions::default(),
      hash_type: AssetHashType::Source,
      custom_hash: None,
      bundling: None,
    }
  }

  fn context(root: &Path, program: &str) -> PipelineContext {
    PipelineContext {
      staging_root: root.to_path_buf(),
      bundler: Bundler::new(program, CancelSignal::never()),
      packaging: DirectoryPackaging::Zip,
      verify_custom_hashes: false,
      cancel: CancelSignal::never(),
    }
  }

  mod source_assets {
    use super::*;

    #[tokio::test]
    async fn directory_is_zipped_under_its_fingerprint() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      write_tree(src.path(), &[("index.js", "exports.handler = 1")]);

      let staged = prepare_asset(&source_of(src.path(), SourceKind::Directory), &context(out.path(), "docker"))
        .await
        .unwrap();

      let expected = fingerprint(&collect(src.path(), &FilterOptions::default(), None).unwrap()).unwrap();
      assert_eq!(staged.asset_hash, expected.0);
      assert_eq!(staged.relative_path, format!("asset.{}.zip", expected));
      assert_eq!(staged.packaging, Packaging::Zip);
      assert!(staged.staged_path.is_file());
      assert!(!staged.cached);
    }

    #[tokio::test]
    async fn identical_content_in_two_places_shares_one_object() {
      let a = tempdir().unwrap();
      let b = tempdir().unwrap();
      let out = tempdir().unwrap();
      write_tree(a.path(), &[("f.txt", "same")]);
      write_tree(b.path(), &[("f.txt", "same")]);
      let ctx = context(out.path(), "docker");

      let first = prepare_asset(&source_of(a.path(), SourceKind::Directory), &ctx).await.unwrap();
      let second = prepare_asset(&source_of(b.path(), SourceKind::Directory), &ctx).await.unwrap();
      assert_eq!(first.asset_hash, second.asset_hash);
      assert!(second.cached);
    }

    #[tokio::test]
    async fn single_file_keeps_extension() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      write_tree(src.path(), &[("app.jar", "jar")]);

      let staged = prepare_asset(&source_of(&src.path().join("app.jar"), SourceKind::File), &context(out.path(), "docker"))
        .await
        .unwrap();
      assert_eq!(staged.packaging, Packaging::File);
      assert!(staged.is_archive);
      assert!(staged.relative_path.ends_with(".jar"));
    }

    #[tokio::test]
    async fn custom_hash_names_the_object() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      write_tree(src.path(), &[("f.txt", "x")]);
      let mut source = source_of(src.path(), SourceKind::Directory);
      source.hash_type = AssetHashType::Custom;
      source.custom_hash = Some("v1".into());

      let staged = prepare_asset(&source, &context(out.path(), "docker")).await.unwrap();
      assert_eq!(staged.asset_hash, hash_bytes(b"v1").0);
    }

    #[tokio::test]
    async fn staging_root_inside_source_is_skipped() {
      let src = tempdir().unwrap();
      write_tree(src.path(), &[("f.txt", "x")]);
      let out = src.path().join("cdk.out");
      fs::create_dir(&out).unwrap();
      let ctx = context(&out, "docker");

      let first = prepare_asset(&source_of(src.path(), SourceKind::Directory), &ctx).await.unwrap();
      let second = prepare_asset(&source_of(src.path(), SourceKind::Directory), &ctx).await.unwrap();
      assert_eq!(first.asset_hash, second.asset_hash);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      let (handle, signal) = crate::cancel::cancel_pair();
      handle.cancel();
      let mut ctx = context(out.path(), "docker");
      ctx.cancel = signal;

      let err = prepare_asset(&source_of(src.path(), SourceKind::Directory), &ctx).await.unwrap_err();
      assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
  }

  #[cfg(unix)]
  mod bundled_assets {
    use super::*;
    use crate::util::testutil::{fake_container, fake_container_runs};

    fn bundled(path: &Path, output_type: BundlingOutput, hash_type: AssetHashType) -> AssetSource {
      let mut source = source_of(path, SourceKind::Directory);
      source.hash_type = hash_type;
      source.bundling = Some(
        BundlingOptions::new(DockerImage::from_registry("alpine"))
          .with_command(["sh", "-c", "build"])
          .with_output_type(output_type),
      );
      source
    }

    #[tokio::test]
    async fn bundling_output_is_cached_across_runs() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      let bin = tempdir().unwrap();
      write_tree(src.path(), &[("main.go", "package main")]);
      let docker = fake_container(bin.path(), r#"echo built > "$OUT/bootstrap""#);
      let ctx = context(out.path(), docker.to_str().unwrap());
      let source = bundled(src.path(), BundlingOutput::NotArchived, AssetHashType::Output);

      let first = prepare_asset(&source, &ctx).await.unwrap();
      let second = prepare_asset(&source, &ctx).await.unwrap();

      assert_eq!(fake_container_runs(bin.path()), 1);
      assert_eq!(first.asset_hash, second.asset_hash);
      assert!(first.bundled);
      assert!(second.cached);
    }

    #[tokio::test]
    async fn bundle_hash_does_not_depend_on_output() {
      let src = tempdir().unwrap();
      let bin = tempdir().unwrap();
      write_tree(src.path(), &[("main.go", "package main")]);
      let source = bundled(src.path(), BundlingOutput::NotArchived, AssetHashType::Bundle);

      let out1 = tempdir().unwrap();
      let docker1 = fake_container(bin.path(), r#"echo one > "$OUT/a""#);
      let one = prepare_asset(&source, &context(out1.path(), docker1.to_str().unwrap())).await.unwrap();

      let out2 = tempdir().unwrap();
      let docker2 = fake_container(bin.path(), r#"echo two > "$OUT/a""#);
      let two = prepare_asset(&source, &context(out2.path(), docker2.to_str().unwrap())).await.unwrap();

      assert_eq!(one.asset_hash, two.asset_hash);
    }

    #[tokio::test]
    async fn archived_output_is_staged_as_a_file() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      let bin = tempdir().unwrap();
      write_tree(src.path(), &[("a", "a")]);
      let docker = fake_container(bin.path(), r#"echo zipbytes > "$OUT/bundle.zip""#);

      let staged = prepare_asset(
        &bundled(src.path(), BundlingOutput::AutoDiscover, AssetHashType::Output),
        &context(out.path(), docker.to_str().unwrap()),
      )
      .await
      .unwrap();

      assert_eq!(staged.packaging, Packaging::File);
      assert!(staged.is_archive);
      assert!(staged.relative_path.ends_with(".zip"));
      assert_eq!(fs::read_to_string(&staged.staged_path).unwrap(), "zipbytes\n");
    }

    #[tokio::test]
    async fn concurrent_runs_only_see_finished_bundles() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      let bin = tempdir().unwrap();
      write_tree(src.path(), &[("main.go", "package main")]);
      let docker = fake_container(bin.path(), r#"echo a > "$OUT/a"; sleep 1; echo b > "$OUT/b""#);
      let mut ctx = context(out.path(), docker.to_str().unwrap());
      ctx.packaging = DirectoryPackaging::Copy;
      let by_output = bundled(src.path(), BundlingOutput::NotArchived, AssetHashType::Output);
      let by_bundle = bundled(src.path(), BundlingOutput::NotArchived, AssetHashType::Bundle);

      let (first, second) = tokio::join!(prepare_asset(&by_output, &ctx), async {
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        prepare_asset(&by_bundle, &ctx).await
      });
      let (first, second) = (first.unwrap(), second.unwrap());

      for staged in [&first, &second] {
        assert!(staged.staged_path.join("a").is_file());
        assert!(staged.staged_path.join("b").is_file());
      }
      let leftovers: Vec<_> = fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect();
      assert!(leftovers.is_empty(), "temporary directories left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn failed_bundling_leaves_no_cache_directory() {
      let src = tempdir().unwrap();
      let out = tempdir().unwrap();
      let bin = tempdir().unwrap();
      write_tree(src.path(), &[("a", "a")]);
      let docker = fake_container(bin.path(), r#"echo partial > "$OUT/x"; echo boom >&2; exit 3"#);

      let err = prepare_asset(
        &bundled(src.path(), BundlingOutput::NotArchived, AssetHashType::Output),
        &context(out.path(), docker.to_str().unwrap()),
      )
      .await
      .unwrap_err();

      assert_eq!(err.kind(), ErrorKind::BundlingFailed);
      let leftovers: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
      assert!(leftovers.is_empty());
    }
  }
}
