//! Well-known names shared across the crate.

/// Cloud assembly schema version written to `manifest.json`.
pub const CLOUD_ASSEMBLY_VERSION: &str = "36.0.0";

/// Default cloud assembly directory when neither config nor `CDK_OUTDIR` set one.
pub const DEFAULT_OUTDIR: &str = "cdk.out";

/// Default container program when `CDK_DOCKER` is unset.
pub const DEFAULT_CONTAINER_PROGRAM: &str = "docker";

pub const ENV_CONTAINER_PROGRAM: &str = "CDK_DOCKER";
pub const ENV_OUTDIR: &str = "CDK_OUTDIR";
pub const ENV_CONTEXT_JSON: &str = "CDK_CONTEXT_JSON";

/// Construct metadata key carrying the asset descriptor.
pub const ASSET_METADATA: &str = "aws:cdk:asset";

/// Context flag enabling `aws:asset:*` metadata on consuming resources.
pub const ASSET_RESOURCE_METADATA_ENABLED_CONTEXT: &str = "aws:cdk:enable-asset-metadata";
pub const ASSET_RESOURCE_METADATA_PATH_KEY: &str = "aws:asset:path";
pub const ASSET_RESOURCE_METADATA_PROPERTY_KEY: &str = "aws:asset:property";

/// Context flag enabling `aws:cdk:path` on every rendered resource.
pub const PATH_METADATA_ENABLE_CONTEXT: &str = "aws:cdk:enable-path-metadata";
pub const PATH_METADATA_KEY: &str = "aws:cdk:path";

/// Mount points inside the bundling container.
pub const BUNDLING_INPUT_DIR: &str = "/asset-input";
pub const BUNDLING_OUTPUT_DIR: &str = "/asset-output";

pub const STAGED_ASSET_PREFIX: &str = "asset.";
pub const BUNDLING_TEMP_PREFIX: &str = "bundling-temp-";

/// Separator between the object prefix and object name in the key parameter.
pub const ASSET_KEY_SEPARATOR: &str = "||";

/// Number of stderr lines kept for a failed bundling diagnostic.
pub const STDERR_TAIL_LINES: usize = 20;

/// Seconds the bundler waits after SIGTERM before killing the container client.
pub const BUNDLING_GRACE_SECS: u64 = 10;

pub const TEMPLATE_FILE_SUFFIX: &str = ".template.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const TREE_FILE: &str = "tree.json";
