//! The `cdk` global table.
//!
//! - `cdk.app` - the root scope
//! - `cdk.dir` - directory of the script being evaluated
//! - `cdk.platforms` - well-known signing platforms by constant name
//! - `cdk.stack(scope, id)` / `cdk.construct(scope, id)`
//! - `cdk.asset(scope, id, opts)`
//! - `cdk.resource(scope, id, { type = ..., properties = {...} })`
//! - `cdk.signing_profile(scope, id, opts)`
//! - `cdk.signing_profile_from_attributes(scope, id, attrs)`
//! - `cdk.signing_profile_permission(scope, id, opts)`
//! - `cdk.context(key)`

use std::path::PathBuf;

use mlua::prelude::*;

use super::objects::{LuaAsset, LuaResource, LuaScope, LuaSigningProfile, SharedApp, app_mut};
use super::options::{self, AssetOpts, ResourceOpts, SigningProfileOpts};
use crate::asset::Asset;
use crate::construct::{App, NodeId};
use crate::resource::{CfnResource, add_resource};
use crate::signer::{Platform, SigningProfile, SigningProfileAttributes, SigningProfilePermission, SigningProfilePermissionProps};

/// Path a child `id` of `scope` would get, for error reporting before the
/// node exists.
fn child_path(app: &App, scope: NodeId, id: &str) -> String {
  match app.tree.path(scope) {
    parent if parent.is_empty() => id.to_string(),
    parent => format!("{parent}/{id}"),
  }
}

/// `cdk.dir`, or the working directory when no script has been loaded.
fn script_dir(lua: &Lua) -> LuaResult<PathBuf> {
  let cdk: LuaTable = lua.globals().get("cdk")?;
  match cdk.get::<Option<String>>("dir")? {
    Some(dir) => Ok(PathBuf::from(dir)),
    None => std::env::current_dir().map_err(LuaError::external),
  }
}

type Scope = LuaUserDataRef<LuaScope>;

/// Register the `cdk` global table.
pub fn register_globals(lua: &Lua, app: SharedApp) -> LuaResult<()> {
  let cdk = lua.create_table()?;
  let root = app.try_borrow().map_err(LuaError::external)?.root();
  cdk.set("app", LuaScope::new(&app, root))?;

  let platforms = lua.create_table()?;
  for (name, platform) in Platform::known_platforms() {
    platforms.set(name, platform.platform_id.to_string())?;
  }
  cdk.set("platforms", platforms)?;

  let shared = app.clone();
  cdk.set(
    "stack",
    lua.create_function(move |_, (scope, id): (Scope, String)| {
      let node = app_mut(&shared)?.add_stack(scope.node, &id).map_err(LuaError::external)?;
      Ok(LuaScope::new(&shared, node))
    })?,
  )?;

  let shared = app.clone();
  cdk.set(
    "construct",
    lua.create_function(move |_, (scope, id): (Scope, String)| {
      let node = app_mut(&shared)?
        .add_construct(scope.node, &id)
        .map_err(LuaError::external)?;
      Ok(LuaScope::new(&shared, node))
    })?,
  )?;

  let shared = app.clone();
  cdk.set(
    "asset",
    lua.create_function(move |lua, (scope, id, opts): (Scope, String, LuaValue)| {
      let base_dir = script_dir(lua)?;
      let asset = {
        let mut app = app_mut(&shared)?;
        let path = child_path(&app, scope.node, &id);
        let props = options::parse::<AssetOpts>(lua, opts, &path, "asset")
          .and_then(|opts| opts.into_props(&base_dir, &path))
          .map_err(LuaError::external)?;
        Asset::new(&mut app, scope.node, &id, props).map_err(LuaError::external)?
      };
      Ok(LuaAsset {
        app: shared.clone(),
        asset,
      })
    })?,
  )?;

  let shared = app.clone();
  cdk.set(
    "resource",
    lua.create_function(move |lua, (scope, id, opts): (Scope, String, LuaValue)| {
      let resource = {
        let mut app = app_mut(&shared)?;
        let path = child_path(&app, scope.node, &id);
        let opts: ResourceOpts = options::parse(lua, opts, &path, "resource").map_err(LuaError::external)?;
        let resource = opts
          .properties
          .into_iter()
          .fold(CfnResource::new(opts.resource_type), |r, (name, value)| r.with_property(name, value));
        add_resource(&mut app, scope.node, &id, resource).map_err(LuaError::external)?
      };
      Ok(LuaResource {
        app: shared.clone(),
        resource,
      })
    })?,
  )?;

  let shared = app.clone();
  cdk.set(
    "signing_profile",
    lua.create_function(move |lua, (scope, id, opts): (Scope, String, LuaValue)| {
      let profile = {
        let mut app = app_mut(&shared)?;
        let path = child_path(&app, scope.node, &id);
        let props = options::parse::<SigningProfileOpts>(lua, opts, &path, "signing profile")
          .and_then(|opts| opts.into_props(&path))
          .map_err(LuaError::external)?;
        SigningProfile::new(&mut app, scope.node, &id, props).map_err(LuaError::external)?
      };
      Ok(LuaSigningProfile {
        app: shared.clone(),
        profile,
      })
    })?,
  )?;

  let shared = app.clone();
  cdk.set(
    "signing_profile_from_attributes",
    lua.create_function(move |lua, (scope, id, attrs): (Scope, String, LuaValue)| {
      let profile = {
        let mut app = app_mut(&shared)?;
        let path = child_path(&app, scope.node, &id);
        let attrs: SigningProfileAttributes =
          options::parse(lua, attrs, &path, "signing profile attribute").map_err(LuaError::external)?;
        SigningProfile::from_signing_profile_attributes(&mut app, scope.node, &id, attrs)
          .map_err(LuaError::external)?
      };
      Ok(LuaSigningProfile {
        app: shared.clone(),
        profile,
      })
    })?,
  )?;

  let shared = app.clone();
  cdk.set(
    "signing_profile_permission",
    lua.create_function(move |lua, (scope, id, opts): (Scope, String, LuaValue)| {
      let permission = {
        let mut app = app_mut(&shared)?;
        let path = child_path(&app, scope.node, &id);
        let props: SigningProfilePermissionProps =
          options::parse(lua, opts, &path, "profile permission").map_err(LuaError::external)?;
        SigningProfilePermission::new(&mut app, scope.node, &id, props).map_err(LuaError::external)?
      };
      Ok(LuaResource {
        app: shared.clone(),
        resource: permission.resource,
      })
    })?,
  )?;

  let shared = app;
  cdk.set(
    "context",
    lua.create_function(move |lua, key: String| {
      let app = shared.try_borrow().map_err(LuaError::external)?;
      match app.context.get(&key) {
        Some(value) => lua.to_value(value),
        None => Ok(LuaValue::Nil),
      }
    })?,
  )?;

  lua.globals().set("cdk", cdk)?;
  Ok(())
}
