use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::crypto::EncryptionAlg;

/// When a tenant-configured extra field is merged into a response.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MergePolicy {
    Always,
    #[default]
    SuccessOnly,
    FailureOnly,
}

impl MergePolicy {
    /// Unknown or missing policy names fall back to `SuccessOnly`.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.trim().parse().ok()).unwrap_or_default()
    }

    pub fn applies(self, success: bool) -> bool {
        match self {
            Self::Always => true,
            Self::SuccessOnly => success,
            Self::FailureOnly => !success,
        }
    }
}

/// An application namespace: its own cards, keys and response policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub owner: String,
    pub name: String,
    /// Public identifier sent in `X-API-Key`
    pub api_key: String,
    /// Signing and envelope key; `api_key` is used when unset
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub secure: bool,
    pub encryption_alg: EncryptionAlg,
    /// Raw JSON template of extra response fields
    pub redeem_extra: Option<String>,
    /// Map-wide default policy for extra fields given in the flat format
    pub redeem_extra_mode: Option<MergePolicy>,
    pub announcement: Option<String>,
    pub version: Option<String>,
    pub changelog: Option<String>,
    pub created_at: i64,
}

impl Tenant {
    pub fn signing_key(&self) -> &str {
        match self.secret_key.as_deref() {
            Some(secret) if !secret.is_empty() => secret,
            _ => &self.api_key,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTenant {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub encryption_alg: EncryptionAlg,
    #[serde(default)]
    pub redeem_extra: Option<serde_json::Value>,
    #[serde(default)]
    pub redeem_extra_mode: Option<MergePolicy>,
    #[serde(default)]
    pub announcement: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub changelog: Option<String>,
}
