//! The `GrafanaDatasource` content object.

use super::ObjectMeta;
use serde::{Deserialize, Serialize};

/// A datasource definition synced into one or more instances.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDatasource {
    /// Identifying metadata.
    pub metadata: ObjectMeta,
    /// User-authored desired state.
    pub spec: GrafanaDatasourceSpec,
    /// Engine-owned observed state.
    #[serde(default)]
    pub status: GrafanaDatasourceStatus,
}

/// User-authored specification for one datasource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDatasourceSpec {
    /// The datasource definition pushed to the instance API.
    pub datasource: DatasourceSpec,
}

/// The datasource definition itself.
///
/// `json_data` is plaintext configuration copied into the payload verbatim.
/// `secure_json_data` sub-fields are either raw values, preserved
/// byte-for-byte, or `{"secretKeyRef": {"name", "key"}}` references that are
/// dereferenced at build time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSpec {
    /// Display name of the datasource.
    pub name: String,
    /// Datasource type, e.g. `prometheus`.
    #[serde(rename = "type")]
    pub type_: String,
    /// Access mode, e.g. `proxy`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access: String,
    /// Target URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Optional user for datasource authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Optional database name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Whether this is the instance's default datasource.
    #[serde(default)]
    pub is_default: bool,
    /// Whether the datasource stays editable in the instance UI.
    #[serde(default)]
    pub editable: bool,
    /// Plaintext configuration section.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub json_data: serde_json::Value,
    /// Secure configuration section.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub secure_json_data: serde_json::Value,
}

/// Engine-owned observed state for a datasource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaDatasourceStatus {
    /// Content hash of the payload last pushed to the instance.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    /// Human-readable message from the most recent sync.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_message: String,
}
