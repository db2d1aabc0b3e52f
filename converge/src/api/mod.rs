//! Desired-state object model.
//!
//! The user authors the `spec` side of these objects through the cluster's
//! declarative store; the `status` side is written exclusively by the
//! convergence engine.

mod datasource;
mod instance;

pub use datasource::{
    DatasourceSpec, GrafanaDatasource, GrafanaDatasourceSpec,
    GrafanaDatasourceStatus,
};
pub use instance::{
    ClientSpec, External, Grafana, GrafanaSpec, GrafanaStatus, IngressSpec,
    PersistenceSpec, PluginSpec, TlsSpec, DEFAULT_IMAGE_REPOSITORY,
    INSTANCE_HTTP_PORT,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifying metadata shared by all desired-state objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within its namespace.
    pub name: String,
    /// Namespace the object lives in.
    pub namespace: String,
    /// Opaque version used for optimistic-concurrency updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Creates metadata for a namespaced object.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            resource_version: None,
            labels: BTreeMap::new(),
        }
    }
}

/// A reference to one key of a secret in the object's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    /// Name of the secret.
    pub name: String,
    /// Key within the secret.
    pub key: String,
}

impl SecretKeySelector {
    /// Creates a selector for `name`/`key`.
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}
