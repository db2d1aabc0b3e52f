//! In-memory cluster store for tests and embedded use.

use super::{
    InstanceStore, ManagedResource, ResourceKind, ResourceStore, SecretStore,
    StoreError,
};
use crate::api::Grafana;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

type InstanceKey = (String, String);
type ResourceKey = (ResourceKind, String, String);

/// An in-memory implementation of every cluster collaborator trait.
///
/// Resource versions are bumped monotonically on every write, so stale
/// updates surface as conflicts exactly like the real store.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    instances: RwLock<HashMap<InstanceKey, Grafana>>,
    secrets: RwLock<HashMap<InstanceKey, BTreeMap<String, String>>>,
    resources: RwLock<HashMap<ResourceKey, ManagedResource>>,
    revision: AtomicU64,
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> String {
        self.revision.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Stores an instance unconditionally, assigning a fresh resource
    /// version, and returns the stored object.
    pub fn put_instance(&self, mut instance: Grafana) -> Grafana {
        instance.metadata.resource_version = Some(self.next_revision());
        let key = (
            instance.metadata.namespace.clone(),
            instance.metadata.name.clone(),
        );
        self.instances.write().insert(key, instance.clone());
        instance
    }

    /// Stores a secret's key/value entries.
    pub fn put_secret<I, K, V>(&self, namespace: &str, name: &str, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.secrets
            .write()
            .insert((namespace.to_string(), name.to_string()), entries);
    }

    /// Returns a managed resource, if present.
    #[must_use]
    pub fn resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Option<ManagedResource> {
        self.resources
            .read()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Overwrites the server-owned `status` section of a managed resource.
    ///
    /// Test hook simulating the cluster reporting readiness (PVC binding,
    /// deployment rollout).
    pub fn set_resource_status(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) {
        let mut resources = self.resources.write();
        if let Some(resource) =
            resources.get_mut(&(kind, namespace.to_string(), name.to_string()))
        {
            resource.payload["status"] = status;
        }
    }

    /// Returns the number of managed resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }
}

#[async_trait]
impl InstanceStore for InMemoryCluster {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Grafana>, StoreError> {
        Ok(self
            .instances
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn update_spec(&self, instance: &Grafana) -> Result<Grafana, StoreError> {
        self.conditional_update(instance, |stored, incoming| {
            stored.spec = incoming.spec.clone();
        })
    }

    async fn update_status(&self, instance: &Grafana) -> Result<Grafana, StoreError> {
        self.conditional_update(instance, |stored, incoming| {
            stored.status = incoming.status.clone();
        })
    }
}

impl InMemoryCluster {
    fn conditional_update(
        &self,
        instance: &Grafana,
        write: impl FnOnce(&mut Grafana, &Grafana),
    ) -> Result<Grafana, StoreError> {
        let key = (
            instance.metadata.namespace.clone(),
            instance.metadata.name.clone(),
        );
        let mut instances = self.instances.write();
        let stored = instances.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: "Grafana".to_string(),
            namespace: instance.metadata.namespace.clone(),
            name: instance.metadata.name.clone(),
        })?;

        if stored.metadata.resource_version != instance.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: "Grafana".to_string(),
                namespace: instance.metadata.namespace.clone(),
                name: instance.metadata.name.clone(),
            });
        }

        write(stored, instance);
        stored.metadata.resource_version = Some(self.next_revision());
        Ok(stored.clone())
    }
}

#[async_trait]
impl SecretStore for InMemoryCluster {
    async fn get_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .secrets
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|entries| entries.get(key).cloned()))
    }
}

#[async_trait]
impl ResourceStore for InMemoryCluster {
    async fn apply(&self, mut resource: ManagedResource) -> Result<(), StoreError> {
        let key = (
            resource.kind,
            resource.namespace.clone(),
            resource.name.clone(),
        );

        // Managed secrets are visible through the read-only secret store,
        // exactly as both views share one backing store in a real cluster.
        if resource.kind == ResourceKind::Secret {
            if let Some(data) = resource.payload.get("data").and_then(|d| d.as_object()) {
                let entries: Vec<(String, String)> = data
                    .iter()
                    .filter_map(|(k, v)| {
                        v.as_str().map(|v| (k.clone(), v.to_string()))
                    })
                    .collect();
                self.put_secret(&resource.namespace, &resource.name, entries);
            }
        }

        let mut resources = self.resources.write();
        if let Some(existing) = resources.get(&key) {
            // The status section is server-owned; an apply never clears it.
            if resource.payload.is_object() && resource.payload.get("status").is_none() {
                if let Some(status) = existing.payload.get("status") {
                    resource.payload["status"] = status.clone();
                }
            }
        }
        resources.insert(key, resource);
        Ok(())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>, StoreError> {
        Ok(self.resource(kind, namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_update_status_requires_fresh_resource_version() {
        let cluster = InMemoryCluster::new();
        let stored = cluster.put_instance(Grafana::new("monitoring", "main"));

        // Another writer bumps the object.
        cluster.put_instance(stored.clone());

        let mut stale = stored;
        stale.status.version = "10.2.0".to_string();
        let err = cluster.update_status(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        // Re-fetch and re-apply succeeds.
        let mut fresh = InstanceStore::get(&cluster, "monitoring", "main")
            .await
            .unwrap()
            .unwrap();
        fresh.status = stale.status.clone();
        let updated = cluster.update_status(&fresh).await.unwrap();
        assert_eq!(updated.status.version, "10.2.0");
    }

    #[tokio::test]
    async fn test_update_status_missing_object() {
        let cluster = InMemoryCluster::new();
        let gone = Grafana::new("monitoring", "gone");
        let err = cluster.update_status(&gone).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_apply_preserves_server_owned_status() {
        let cluster = InMemoryCluster::new();
        let resource = ManagedResource::new(
            ResourceKind::PersistentVolumeClaim,
            "monitoring",
            "main-pvc",
            "main",
            serde_json::json!({"spec": {"size": "10Gi"}}),
        );
        cluster.apply(resource.clone()).await.unwrap();

        cluster.set_resource_status(
            ResourceKind::PersistentVolumeClaim,
            "monitoring",
            "main-pvc",
            serde_json::json!({"phase": "Pending"}),
        );

        // Re-applying the same desired payload keeps the reported status.
        cluster.apply(resource).await.unwrap();
        let stored = cluster
            .resource(ResourceKind::PersistentVolumeClaim, "monitoring", "main-pvc")
            .unwrap();
        assert_eq!(stored.payload["status"]["phase"], "Pending");
    }

    #[tokio::test]
    async fn test_applied_secret_visible_through_secret_store() {
        let cluster = InMemoryCluster::new();
        cluster
            .apply(ManagedResource::new(
                ResourceKind::Secret,
                "monitoring",
                "main-admin-credentials",
                "main",
                serde_json::json!({"data": {"ADMIN_USER": "admin"}}),
            ))
            .await
            .unwrap();

        let value = cluster
            .get_value("monitoring", "main-admin-credentials", "ADMIN_USER")
            .await
            .unwrap();
        assert_eq!(value, Some("admin".to_string()));
    }
}
