//! synthkit-lib: construct graph, asset pipeline and cloud assembly output.
//!
//! - `construct`: the construct tree (`App`, stacks, ids, metadata)
//! - `asset`: filtering, fingerprinting, bundling and staging of file assets
//! - `synth`: prepare, resolve and emit templates plus the assembly manifest
//! - `signer`: code-signing profile constructs
//! - `eval`: building an app from a Lua script

pub mod asset;
pub mod cancel;
pub mod consts;
pub mod construct;
pub mod error;
pub mod eval;
pub mod lua;
pub mod manifest;
pub mod platform;
pub mod resource;
pub mod signer;
pub mod synth;
pub mod token;
pub mod util;
