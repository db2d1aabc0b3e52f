//! Persistent storage stage.

use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::Grafana;
use crate::cluster::{ManagedResource, ResourceKind, ResourceStore};
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use std::sync::Arc;

/// Ensures the storage claim for the instance database.
///
/// Instances without a persistence spec converge trivially. A claim the
/// cluster still reports as pending is a normal waiting condition, not a
/// failure.
pub struct StorageReconciler {
    resources: Arc<dyn ResourceStore>,
}

impl StorageReconciler {
    /// Creates the reconciler over the managed-resource store.
    #[must_use]
    pub fn new(resources: Arc<dyn ResourceStore>) -> Self {
        Self { resources }
    }

    async fn converge(&self, instance: &Grafana) -> Result<StageOutcome, ConvergeError> {
        let Some(persistence) = &instance.spec.persistence else {
            return Ok(StageOutcome::success());
        };

        if persistence.size.trim().is_empty() {
            return Err(ConvergeError::InvalidSpec(
                "persistence.size must not be empty".to_string(),
            ));
        }

        let namespace = &instance.metadata.namespace;
        let claim_name = instance.pvc_name();

        let mut spec = serde_json::json!({
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": persistence.size } },
        });
        if let Some(class) = &persistence.storage_class {
            spec["storageClassName"] = serde_json::Value::String(class.clone());
        }

        self.resources
            .apply(ManagedResource::new(
                ResourceKind::PersistentVolumeClaim,
                namespace.clone(),
                claim_name.clone(),
                instance.metadata.name.clone(),
                serde_json::json!({ "spec": spec }),
            ))
            .await?;

        let claim = self
            .resources
            .get(ResourceKind::PersistentVolumeClaim, namespace, &claim_name)
            .await?;
        let phase = claim
            .as_ref()
            .and_then(|c| c.payload.get("status"))
            .and_then(|s| s.get("phase"))
            .and_then(|p| p.as_str());
        if phase == Some("Pending") {
            return Ok(StageOutcome::in_progress("waiting for PVC binding"));
        }

        Ok(StageOutcome::success())
    }
}

#[async_trait]
impl StageReconciler for StorageReconciler {
    fn stage(&self) -> StageName {
        StageName::Storage
    }

    async fn reconcile(
        &self,
        _ctx: &RunContext,
        instance: &mut Grafana,
        _vars: &mut ReconcileVars,
    ) -> StageOutcome {
        self.converge(instance).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PersistenceSpec;
    use crate::cluster::InMemoryCluster;
    use pretty_assertions::assert_eq;

    fn persistent_instance() -> Grafana {
        let mut instance = Grafana::new("monitoring", "main");
        instance.spec.persistence = Some(PersistenceSpec {
            size: "10Gi".to_string(),
            storage_class: Some("fast".to_string()),
        });
        instance
    }

    #[tokio::test]
    async fn test_no_persistence_is_trivial_success() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = StorageReconciler::new(cluster.clone());
        let mut instance = Grafana::new("monitoring", "main");

        let outcome = reconciler
            .reconcile(&RunContext::new(), &mut instance, &mut ReconcileVars::new())
            .await;
        assert!(matches!(outcome, StageOutcome::Success));
        assert_eq!(cluster.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_claim_applied_with_requested_size() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = StorageReconciler::new(cluster.clone());
        let mut instance = persistent_instance();

        let outcome = reconciler
            .reconcile(&RunContext::new(), &mut instance, &mut ReconcileVars::new())
            .await;
        assert!(matches!(outcome, StageOutcome::Success));

        let claim = cluster
            .resource(ResourceKind::PersistentVolumeClaim, "monitoring", "main-pvc")
            .unwrap();
        assert_eq!(claim.payload["spec"]["resources"]["requests"]["storage"], "10Gi");
        assert_eq!(claim.payload["spec"]["storageClassName"], "fast");
    }

    #[tokio::test]
    async fn test_pending_claim_is_in_progress() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = StorageReconciler::new(cluster.clone());
        let mut instance = persistent_instance();

        reconciler
            .reconcile(&RunContext::new(), &mut instance, &mut ReconcileVars::new())
            .await;
        cluster.set_resource_status(
            ResourceKind::PersistentVolumeClaim,
            "monitoring",
            "main-pvc",
            serde_json::json!({"phase": "Pending"}),
        );

        let outcome = reconciler
            .reconcile(&RunContext::new(), &mut instance, &mut ReconcileVars::new())
            .await;
        match outcome {
            StageOutcome::InProgress(message) => {
                assert_eq!(message, "waiting for PVC binding");
            }
            other => panic!("expected InProgress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_size_fails() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = StorageReconciler::new(cluster);
        let mut instance = persistent_instance();
        instance.spec.persistence = Some(PersistenceSpec {
            size: "  ".to_string(),
            storage_class: None,
        });

        let outcome = reconciler
            .reconcile(&RunContext::new(), &mut instance, &mut ReconcileVars::new())
            .await;
        assert!(matches!(
            outcome,
            StageOutcome::Failed(ConvergeError::InvalidSpec(_))
        ));
    }
}
