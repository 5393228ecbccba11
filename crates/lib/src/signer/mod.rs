//! Code-signing profiles and profile permissions.
//!
//! A [`SigningProfile`] is a construct wrapping a single
//! `AWS::Signer::SigningProfile` resource (child id `Resource`). Its ARN and
//! version attributes are tokens, resolved when the template is emitted.
//! Existing profiles can be referenced with
//! [`SigningProfile::from_signing_profile_attributes`], which computes the
//! ARN from the deployment partition, region and account.

mod types;

use std::collections::BTreeMap;

use serde_json::{Value, json};

pub use types::*;

use crate::construct::{App, ConstructError, NodeId, NodeKind};
use crate::resource::{CfnResource, ResourceRef, add_resource};
use crate::token::{PseudoParameter, TokenValue};

pub const SIGNING_PROFILE_TYPE: &str = "AWS::Signer::SigningProfile";
pub const PROFILE_PERMISSION_TYPE: &str = "AWS::Signer::ProfilePermission";

/// A signing profile, declared here or imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningProfile {
  pub node: NodeId,
  /// The underlying resource; `None` for imported profiles.
  pub resource: Option<ResourceRef>,
  pub signing_profile_arn: String,
  pub signing_profile_name: String,
  pub signing_profile_version: String,
  pub signing_profile_version_arn: String,
  signature_validity: SignatureValidity,
}

impl SigningProfile {
  pub fn new(app: &mut App, scope: NodeId, id: &str, props: SigningProfileProps) -> Result<Self, ConstructError> {
    app.require_stack(scope, "signing profiles")?;
    let local_id = app.tree.validate_child(scope, id)?;
    if let Some(name) = &props.signing_profile_name
      && !is_valid_profile_name(name)
    {
      return Err(ConstructError::invalid(
        format!("{}/{local_id}", app.tree.path(scope)),
        format!("signing profile name '{name}' must be 2 to 64 letters, digits or underscores"),
      ));
    }

    let mut resource = CfnResource::new(SIGNING_PROFILE_TYPE)
      .with_property("PlatformId", Value::String(props.platform.platform_id.to_string()));
    if let Some(validity) = props.signature_validity {
      resource = resource.with_property("SignatureValidityPeriod", validity.to_property());
    }
    if let Some(name) = &props.signing_profile_name {
      resource = resource.with_property("ProfileName", Value::String(name.clone()));
    }
    if !props.tags.is_empty() {
      let tags: Vec<Value> = props.tags.iter().map(|(k, v)| json!({ "Key": k, "Value": v })).collect();
      resource = resource.with_property("Tags", Value::Array(tags));
    }

    let node = app.add_construct(scope, id)?;
    let resource = add_resource(app, node, "Resource", resource)?;
    let signing_profile_name = resource.get_att(app, "ProfileName");
    let signing_profile_version = resource.get_att(app, "ProfileVersion");
    let signing_profile_version_arn = resource.get_att(app, "ProfileVersionArn");

    Ok(Self {
      node,
      signing_profile_arn: resource.ref_token.clone(),
      signing_profile_name,
      signing_profile_version,
      signing_profile_version_arn,
      resource: Some(resource),
      signature_validity: props.signature_validity.unwrap_or_default(),
    })
  }

  /// Reference a profile that already exists.
  pub fn from_signing_profile_attributes(
    app: &mut App,
    scope: NodeId,
    id: &str,
    attrs: SigningProfileAttributes,
  ) -> Result<Self, ConstructError> {
    let local_id = app.tree.validate_child(scope, id)?;
    for (field, value) in [
      ("signing_profile_name", &attrs.signing_profile_name),
      ("signing_profile_version", &attrs.signing_profile_version),
    ] {
      if value.trim().is_empty() {
        return Err(ConstructError::invalid(
          format!("{}/{local_id}", app.tree.path(scope)),
          format!("{field} must not be empty"),
        ));
      }
    }

    let attributes = BTreeMap::from([
      ("signingProfileName".to_string(), attrs.signing_profile_name.clone()),
      ("signingProfileVersion".to_string(), attrs.signing_profile_version.clone()),
    ]);
    let node = app.tree.add_child(scope, id, NodeKind::Imported { attributes })?;

    let mut pseudo = |label: &str, p| Value::String(app.tokens.register(label, TokenValue::Pseudo(p)));
    let partition = pseudo("Partition", PseudoParameter::Partition);
    let region = pseudo("Region", PseudoParameter::Region);
    let account = pseudo("AccountId", PseudoParameter::AccountId);

    let arn = app.tokens.register(
      "Arn",
      TokenValue::Join {
        delimiter: String::new(),
        parts: vec![
          json!("arn:"),
          partition,
          json!(":signer:"),
          region,
          json!(":"),
          account,
          Value::String(format!(":/signing-profiles/{}", attrs.signing_profile_name)),
        ],
      },
    );
    let version_arn = app.tokens.register(
      "VersionArn",
      TokenValue::Join {
        delimiter: String::new(),
        parts: vec![
          Value::String(arn.clone()),
          Value::String(format!("/{}", attrs.signing_profile_version)),
        ],
      },
    );

    Ok(Self {
      node,
      resource: None,
      signing_profile_arn: arn,
      signing_profile_name: attrs.signing_profile_name,
      signing_profile_version: attrs.signing_profile_version,
      signing_profile_version_arn: version_arn,
      signature_validity: SignatureValidity::default(),
    })
  }

  /// The effective validity period; 135 months unless set explicitly.
  pub fn signature_validity(&self) -> SignatureValidity {
    self.signature_validity
  }
}

fn is_valid_profile_name(name: &str) -> bool {
  (2..=64).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Grants a principal cross-account access to a signing profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningProfilePermission {
  pub node: NodeId,
  pub resource: ResourceRef,
}

impl SigningProfilePermission {
  pub fn new(
    app: &mut App,
    scope: NodeId,
    id: &str,
    props: SigningProfilePermissionProps,
  ) -> Result<Self, ConstructError> {
    let invalid = |app: &App, message: String| {
      let parent = app.tree.path(scope);
      let path = if parent.is_empty() { id.to_string() } else { format!("{parent}/{id}") };
      ConstructError::invalid(path, message)
    };
    for (field, value) in [
      ("action", &props.action),
      ("principal", &props.principal),
      ("profile_name", &props.profile_name),
      ("statement_id", &props.statement_id),
    ] {
      if value.trim().is_empty() {
        return Err(invalid(app, format!("{field} must not be empty")));
      }
    }
    if matches!(&props.profile_version, Some(v) if v.trim().is_empty()) {
      return Err(invalid(app, "profile_version must not be empty when set".to_string()));
    }

    let mut resource = CfnResource::new(PROFILE_PERMISSION_TYPE)
      .with_property("Action", Value::String(props.action))
      .with_property("Principal", Value::String(props.principal))
      .with_property("ProfileName", Value::String(props.profile_name))
      .with_property("StatementId", Value::String(props.statement_id));
    if let Some(version) = props.profile_version {
      resource = resource.with_property("ProfileVersion", Value::String(version));
    }

    let resource = add_resource(app, scope, id, resource)?;
    Ok(Self {
      node: resource.node,
      resource,
    })
  }
}
