//! Userdata handed back to Lua by the `cdk` constructors.
//!
//! Every object keeps a shared handle to the [`App`] so its methods can
//! mutate the tree. Scope arguments are always a [`LuaScope`]; constructs
//! expose theirs through the `node` field.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use mlua::prelude::*;

use crate::asset::Asset;
use crate::construct::{App, NodeId};
use crate::resource::{ResourceRef, resource_mut};
use crate::signer::SigningProfile;

pub type SharedApp = Rc<RefCell<App>>;

/// Mutably borrow the app, failing instead of panicking on reentrancy.
pub fn app_mut(app: &SharedApp) -> LuaResult<RefMut<'_, App>> {
  app.try_borrow_mut().map_err(LuaError::external)
}

/// A node of the construct tree.
#[derive(Clone)]
pub struct LuaScope {
  pub app: SharedApp,
  pub node: NodeId,
}

impl LuaScope {
  pub fn new(app: &SharedApp, node: NodeId) -> Self {
    Self { app: app.clone(), node }
  }
}

impl LuaUserData for LuaScope {
  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_method("path", |_, this, ()| {
      let app = this.app.try_borrow().map_err(LuaError::external)?;
      Ok(app.tree.path(this.node))
    });

    methods.add_method("id", |_, this, ()| {
      let app = this.app.try_borrow().map_err(LuaError::external)?;
      Ok(app.tree.node(this.node).id().to_string())
    });

    methods.add_method("add_metadata", |lua, this, (key, value): (String, LuaValue)| {
      let data: serde_json::Value = lua.from_value(value)?;
      app_mut(&this.app)?
        .tree
        .add_metadata(this.node, &key, data)
        .map_err(LuaError::external)
    });

    methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
      let app = this.app.try_borrow().map_err(LuaError::external)?;
      Ok(app.tree.display_path(this.node))
    });
  }
}

/// A generic template resource.
pub struct LuaResource {
  pub app: SharedApp,
  pub resource: ResourceRef,
}

impl LuaUserData for LuaResource {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("ref", |_, this| Ok(this.resource.ref_token.clone()));
    fields.add_field_method_get("node", |_, this| Ok(LuaScope::new(&this.app, this.resource.node)));
  }

  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_method("get_att", |_, this, attribute: String| {
      let mut app = app_mut(&this.app)?;
      Ok(this.resource.get_att(&mut app, &attribute))
    });

    methods.add_method("add_property_override", |lua, this, (path, value): (String, LuaValue)| {
      let value: serde_json::Value = lua.from_value(value)?;
      let mut app = app_mut(&this.app)?;
      resource_mut(&mut app, this.resource.node)
        .map_err(LuaError::external)?
        .add_property_override(path, value);
      Ok(())
    });
  }
}

pub struct LuaAsset {
  pub app: SharedApp,
  pub asset: Asset,
}

impl LuaUserData for LuaAsset {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("s3_bucket_name", |_, this| Ok(this.asset.s3_bucket_name.clone()));
    fields.add_field_method_get("s3_object_key", |_, this| Ok(this.asset.s3_object_key.clone()));
    fields.add_field_method_get("s3_object_url", |_, this| Ok(this.asset.s3_object_url.clone()));
    fields.add_field_method_get("asset_hash", |_, this| Ok(this.asset.asset_hash.clone()));
    fields.add_field_method_get("asset_path", |_, this| Ok(this.asset.asset_path.clone()));
    fields.add_field_method_get("node", |_, this| Ok(LuaScope::new(&this.app, this.asset.node)));
  }

  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_method(
      "add_resource_metadata",
      |_, this, (resource, property): (LuaUserDataRef<LuaResource>, String)| {
        let mut app = app_mut(&this.app)?;
        this
          .asset
          .add_resource_metadata(&mut app, resource.resource.node, &property)
          .map_err(LuaError::external)
      },
    );
  }
}

pub struct LuaSigningProfile {
  pub app: SharedApp,
  pub profile: SigningProfile,
}

impl LuaUserData for LuaSigningProfile {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("arn", |_, this| Ok(this.profile.signing_profile_arn.clone()));
    fields.add_field_method_get("name", |_, this| Ok(this.profile.signing_profile_name.clone()));
    fields.add_field_method_get("version", |_, this| Ok(this.profile.signing_profile_version.clone()));
    fields.add_field_method_get("version_arn", |_, this| {
      Ok(this.profile.signing_profile_version_arn.clone())
    });
    fields.add_field_method_get("node", |_, this| Ok(LuaScope::new(&this.app, this.profile.node)));
    fields.add_field_method_get("resource", |_, this| {
      Ok(this.profile.resource.clone().map(|resource| LuaResource {
        app: this.app.clone(),
        resource,
      }))
    });
  }
}
