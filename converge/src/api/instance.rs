//! The `Grafana` desired-state object.

use super::{ObjectMeta, SecretKeySelector};
use crate::stages::{StageName, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default image repository for managed instances pinned by version tag.
pub const DEFAULT_IMAGE_REPOSITORY: &str = "docker.io/grafana/grafana";

/// Port the managed instance serves HTTP on.
pub const INSTANCE_HTTP_PORT: u16 = 3000;

/// A cluster-managed (or externally observed) Grafana instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grafana {
    /// Identifying metadata.
    pub metadata: ObjectMeta,
    /// User-authored desired state.
    pub spec: GrafanaSpec,
    /// Engine-owned observed state.
    #[serde(default)]
    pub status: GrafanaStatus,
}

/// User-authored specification for one instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaSpec {
    /// Pinned version. Unset specs are rewritten to the build default (or
    /// the digest override) before the pipeline runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Present when the instance is observed rather than managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<External>,
    /// Configuration overrides merged into the rendered ini file,
    /// `section -> key -> value`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, BTreeMap<String, String>>,
    /// Plugins to install into the managed workload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,
    /// Persistent storage for the instance database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceSpec>,
    /// Ingress exposure for the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,
    /// HTTP client options used when talking to the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSpec>,
}

/// Connection details for an instance not managed by this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct External {
    /// Public administrative URL of the instance.
    pub url: String,
    /// Bearer token used for API access; takes precedence over basic auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretKeySelector>,
    /// Basic-auth user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_user: Option<SecretKeySelector>,
    /// Basic-auth password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<SecretKeySelector>,
}

/// One plugin to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    /// Plugin identifier, e.g. `grafana-clock-panel`.
    pub name: String,
    /// Plugin version.
    pub version: String,
}

/// Persistent storage request for the managed workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Requested size, e.g. `10Gi`.
    pub size: String,
    /// Storage class; the cluster default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// Ingress exposure for the managed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// External host name.
    pub host: String,
    /// Whether the host terminates TLS.
    #[serde(default)]
    pub tls: bool,
}

/// HTTP client options for administrative API access.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// TLS options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
}

/// TLS options for administrative API access.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Skip server certificate verification.
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Secret key holding a combined PEM client certificate and key for
    /// mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<SecretKeySelector>,
}

/// Engine-owned observed state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaStatus {
    /// The stage most recently entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    /// Outcome of the most recent run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_status: Option<StageStatus>,
    /// Human-readable message from the most recent run; empty on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_message: String,
    /// Version detected from the running instance.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Administrative URL of the instance.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_url: String,
}

impl Grafana {
    /// Creates an instance with empty spec and status.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: GrafanaSpec::default(),
            status: GrafanaStatus::default(),
        }
    }

    /// Returns true if the instance is observed rather than managed.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.spec.external.is_some()
    }

    /// Name of the managed admin credential secret.
    #[must_use]
    pub fn admin_secret_name(&self) -> String {
        format!("{}-admin-credentials", self.metadata.name)
    }

    /// Name of the managed ini config map.
    #[must_use]
    pub fn config_map_name(&self) -> String {
        format!("{}-ini", self.metadata.name)
    }

    /// Name of the managed storage claim.
    #[must_use]
    pub fn pvc_name(&self) -> String {
        format!("{}-pvc", self.metadata.name)
    }

    /// Name of the managed service account.
    #[must_use]
    pub fn service_account_name(&self) -> String {
        format!("{}-sa", self.metadata.name)
    }

    /// Name of the managed service.
    #[must_use]
    pub fn service_name(&self) -> String {
        format!("{}-service", self.metadata.name)
    }

    /// Name of the managed ingress.
    #[must_use]
    pub fn ingress_name(&self) -> String {
        format!("{}-ingress", self.metadata.name)
    }

    /// Name of the managed workload deployment.
    #[must_use]
    pub fn deployment_name(&self) -> String {
        format!("{}-deployment", self.metadata.name)
    }

    /// Cluster-internal host name of the managed service.
    #[must_use]
    pub fn service_hostname(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.service_name(),
            self.metadata.namespace
        )
    }

    /// Cluster-internal administrative URL of the managed instance.
    #[must_use]
    pub fn internal_url(&self) -> String {
        format!("http://{}:{INSTANCE_HTTP_PORT}", self.service_hostname())
    }

    /// Resolves the container image for the pinned version.
    ///
    /// A version in content-addressed digest form is already a full image
    /// reference and is used verbatim; a plain version becomes a tag on the
    /// default repository. Returns `None` while the version is unpinned.
    #[must_use]
    pub fn image_ref(&self) -> Option<String> {
        let version = self.spec.version.as_deref()?.trim();
        if version.is_empty() {
            return None;
        }
        if version.contains("@sha256:") {
            Some(version.to_string())
        } else {
            Some(format!("{DEFAULT_IMAGE_REPOSITORY}:{version}"))
        }
    }
}
