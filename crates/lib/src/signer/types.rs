use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A code-signing platform.
///
/// The well-known platforms are associated constants. Any other id is
/// accepted through [`Platform::custom`]; whether it exists is only checked
/// at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform {
  pub platform_id: Cow<'static, str>,
}

impl Platform {
  pub const AWS_IOT_DEVICE_MANAGEMENT_SHA256_ECDSA: Platform = Platform::known("AWSIoTDeviceManagement-SHA256-ECDSA");
  pub const AMAZON_FREE_RTOS_TI_CC3220SF: Platform = Platform::known("AmazonFreeRTOS-TI-CC3220SF");
  pub const AMAZON_FREE_RTOS_DEFAULT: Platform = Platform::known("AmazonFreeRTOS-Default");
  pub const AWS_LAMBDA_SHA384_ECDSA: Platform = Platform::known("AWSLambda-SHA384-ECDSA");
  pub const NOTATION_OCI_SHA384_ECDSA: Platform = Platform::known("Notation-OCI-SHA384-ECDSA");

  const fn known(id: &'static str) -> Self {
    Self {
      platform_id: Cow::Borrowed(id),
    }
  }

  pub fn custom(id: impl Into<String>) -> Self {
    Self {
      platform_id: Cow::Owned(id.into()),
    }
  }

  /// Well-known platforms by their constant name.
  pub fn known_platforms() -> [(&'static str, Platform); 5] {
    [
      ("AWS_IOT_DEVICE_MANAGEMENT_SHA256_ECDSA", Self::AWS_IOT_DEVICE_MANAGEMENT_SHA256_ECDSA),
      ("AMAZON_FREE_RTOS_TI_CC3220SF", Self::AMAZON_FREE_RTOS_TI_CC3220SF),
      ("AMAZON_FREE_RTOS_DEFAULT", Self::AMAZON_FREE_RTOS_DEFAULT),
      ("AWS_LAMBDA_SHA384_ECDSA", Self::AWS_LAMBDA_SHA384_ECDSA),
      ("NOTATION_OCI_SHA384_ECDSA", Self::NOTATION_OCI_SHA384_ECDSA),
    ]
  }

  /// Look a platform up by constant name or by id; unknown ids become custom
  /// platforms.
  pub fn from_name(name: &str) -> Self {
    Self::known_platforms()
      .into_iter()
      .find(|(constant, platform)| *constant == name || platform.platform_id == name)
      .map(|(_, platform)| platform)
      .unwrap_or_else(|| Self::custom(name))
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.platform_id)
  }
}

/// How long signatures made with a profile stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "unit", content = "value")]
pub enum SignatureValidity {
  Days(u32),
  Months(u32),
  Years(u32),
}

impl Default for SignatureValidity {
  fn default() -> Self {
    SignatureValidity::Months(135)
  }
}

impl SignatureValidity {
  /// `{"Type": "DAYS" | "MONTHS" | "YEARS", "Value": n}`.
  pub fn to_property(self) -> Value {
    let (unit, value) = match self {
      SignatureValidity::Days(n) => ("DAYS", n),
      SignatureValidity::Months(n) => ("MONTHS", n),
      SignatureValidity::Years(n) => ("YEARS", n),
    };
    json!({ "Type": unit, "Value": value })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningProfileProps {
  pub platform: Platform,
  /// Omitted from the template when unset; the service applies the default.
  pub signature_validity: Option<SignatureValidity>,
  pub signing_profile_name: Option<String>,
  pub tags: BTreeMap<String, String>,
}

impl SigningProfileProps {
  pub fn new(platform: Platform) -> Self {
    Self {
      platform,
      signature_validity: None,
      signing_profile_name: None,
      tags: BTreeMap::new(),
    }
  }
}

/// Attributes of an existing profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SigningProfileAttributes {
  pub signing_profile_name: String,
  pub signing_profile_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SigningProfilePermissionProps {
  pub action: String,
  pub principal: String,
  pub profile_name: String,
  pub statement_id: String,
  #[serde(default)]
  pub profile_version: Option<String>,
}
