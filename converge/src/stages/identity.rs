//! Workload identity stage.

use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::Grafana;
use crate::cluster::{ManagedResource, ResourceKind, ResourceStore};
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use std::sync::Arc;

/// Ensures the service account the workload runs as.
pub struct IdentityReconciler {
    resources: Arc<dyn ResourceStore>,
}

impl IdentityReconciler {
    /// Creates the reconciler over the managed-resource store.
    #[must_use]
    pub fn new(resources: Arc<dyn ResourceStore>) -> Self {
        Self { resources }
    }

    async fn converge(&self, instance: &Grafana) -> Result<StageOutcome, ConvergeError> {
        self.resources
            .apply(ManagedResource::new(
                ResourceKind::ServiceAccount,
                instance.metadata.namespace.clone(),
                instance.service_account_name(),
                instance.metadata.name.clone(),
                serde_json::json!({
                    "metadata": {
                        "labels": { "app": instance.metadata.name },
                    },
                }),
            ))
            .await?;

        Ok(StageOutcome::success())
    }
}

#[async_trait]
impl StageReconciler for IdentityReconciler {
    fn stage(&self) -> StageName {
        StageName::Identity
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
