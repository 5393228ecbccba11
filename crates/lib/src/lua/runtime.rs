use std::path::Path;

use mlua::prelude::*;

use super::globals;
use super::objects::SharedApp;

/// Create a Lua runtime with the `cdk` global registered against `app`.
pub fn create_runtime(app: SharedApp) -> LuaResult<Lua> {
  let lua = Lua::new();
  globals::register_globals(&lua, app)?;
  Ok(lua)
}

/// Load and execute a Lua file.
///
/// Sets `cdk.dir` to the directory of the file and puts that directory
/// (and its `lua/` subdirectory) on `package.path`, so scripts can
/// `require` their siblings.
pub fn load_file(lua: &Lua, path: &Path) -> LuaResult<LuaValue> {
  let canonical_path = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot canonicalize '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical_path)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical_path.display(), e)))?;
  let dir = canonical_path.parent().unwrap_or(Path::new("")).to_string_lossy().to_string();

  lua.globals().get::<LuaTable>("cdk")?.set("dir", dir.as_str())?;

  let package = lua.globals().get::<LuaTable>("package")?;
  let package_path = package.get::<String>("path")?;
  package.set("path", format!("{dir}/?.lua;{dir}/lua/?.lua;{dir}/lua/?/init.lua;{package_path}"))?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical_path.display()))
    .eval::<LuaValue>()
}
