//! Interfaces to the cluster's declarative store.
//!
//! The engine never talks to a concrete cluster API; it converges through
//! these traits. Spec and status updates are conditional on the object's
//! resource version, so racing writers surface as [`StoreError::Conflict`]
//! and the caller re-fetches and re-applies.

mod memory;

pub use memory::InMemoryCluster;

use crate::api::Grafana;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by the cluster store collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update lost an optimistic-concurrency race.
    #[error("conflict updating {kind} '{namespace}/{name}': stale resource version")]
    Conflict {
        /// Kind of the object being updated.
        kind: String,
        /// Namespace of the object.
        namespace: String,
        /// Name of the object.
        name: String,
    },

    /// The object to update no longer exists.
    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        /// Kind of the missing object.
        kind: String,
        /// Namespace of the missing object.
        namespace: String,
        /// Name of the missing object.
        name: String,
    },

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true for lost optimistic-concurrency races.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Read/write access to the `Grafana` desired-state objects.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Fetches an instance by namespace and name.
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Grafana>, StoreError>;

    /// Persists the instance's spec, conditional on its resource version.
    ///
    /// Returns the stored object with its refreshed resource version.
    async fn update_spec(&self, instance: &Grafana) -> Result<Grafana, StoreError>;

    /// Persists the instance's status sub-resource, conditional on its
    /// resource version.
    ///
    /// Returns the stored object with its refreshed resource version.
    async fn update_status(&self, instance: &Grafana) -> Result<Grafana, StoreError>;
}

/// Read-only access to the secret/credential store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the plaintext value for one key of a secret, or `None` when
    /// the secret or key does not exist.
    async fn get_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError>;
}

/// Kinds of managed sub-resources produced by stage reconcilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// Credential secret.
    Secret,
    /// Configuration file map.
    ConfigMap,
    /// Storage claim.
    PersistentVolumeClaim,
    /// Workload identity.
    ServiceAccount,
    /// Cluster-internal service.
    Service,
    /// External ingress.
    Ingress,
    /// Workload deployment.
    Deployment,
}

impl ResourceKind {
    /// Returns the kind as its wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::ServiceAccount => "ServiceAccount",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::Deployment => "Deployment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed sub-resource owned by a stage reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Namespace of the resource.
    pub namespace: String,
    /// Name of the resource.
    pub name: String,
    /// Name of the owning instance, for garbage collection.
    pub owner: String,
    /// Kind-specific payload.
    pub payload: serde_json::Value,
}

impl ManagedResource {
    /// Creates a managed resource owned by `owner`.
    #[must_use]
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            owner: owner.into(),
            payload,
        }
    }
}

/// Idempotent access to managed sub-resources.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Upserts a resource by kind/namespace/name.
    ///
    /// Applying the same resource twice is a no-op; the server-owned
    /// `status` section of an existing resource is preserved.
    async fn apply(&self, resource: ManagedResource) -> Result<(), StoreError>;

    /// Fetches a resource by kind/namespace/name.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        let err = StoreError::Conflict {
            kind: "Grafana".to_string(),
            namespace: "monitoring".to_string(),
            name: "main".to_string(),
        };
        assert!(err.is_conflict());
        assert!(!StoreError::Backend("boom".to_string()).is_conflict());
    }

    #[test]
    fn test_resource_kind_names() {
        assert_eq!(ResourceKind::PersistentVolumeClaim.as_str(), "PersistentVolumeClaim");
        assert_eq!(ResourceKind::Deployment.to_string(), "Deployment");
    }
}
