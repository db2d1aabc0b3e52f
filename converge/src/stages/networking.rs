//! Service and ingress stage.

use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::{Grafana, INSTANCE_HTTP_PORT};
use crate::cluster::{ManagedResource, ResourceKind, ResourceStore};
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use std::sync::Arc;

/// Ensures the instance's service (and ingress when requested) and records
/// the administrative URL the engine will reach the instance on.
pub struct NetworkingReconciler {
    resources: Arc<dyn ResourceStore>,
}

impl NetworkingReconciler {
    /// Creates the reconciler over the managed-resource store.
    #[must_use]
    pub fn new(resources: Arc<dyn ResourceStore>) -> Self {
        Self { resources }
    }

    async fn converge(
        &self,
        instance: &mut Grafana,
        vars: &mut ReconcileVars,
    ) -> Result<StageOutcome, ConvergeError> {
        let namespace = instance.metadata.namespace.clone();
        let owner = instance.metadata.name.clone();

        self.resources
            .apply(ManagedResource::new(
                ResourceKind::Service,
                namespace.clone(),
                instance.service_name(),
                owner.clone(),
                serde_json::json!({
                    "spec": {
                        "selector": { "app": owner },
                        "ports": [{
                            "name": "grafana",
                            "port": INSTANCE_HTTP_PORT,
                            "targetPort": INSTANCE_HTTP_PORT,
                        }],
                    },
                }),
            ))
            .await?;

        vars.service_hostname = Some(instance.service_hostname());

        let admin_url = if let Some(ingress) = &instance.spec.ingress {
            if ingress.host.trim().is_empty() {
                return Err(ConvergeError::InvalidSpec(
                    "ingress.host must not be empty".to_string(),
                ));
            }

            self.resources
                .apply(ManagedResource::new(
                    ResourceKind::Ingress,
                    namespace,
                    instance.ingress_name(),
                    owner,
                    serde_json::json!({
                        "spec": {
                            "host": ingress.host,
                            "tls": ingress.tls,
                            "backend": {
                                "service": instance.service_name(),
                                "port": INSTANCE_HTTP_PORT,
                            },
                        },
                    }),
                ))
                .await?;

            let scheme = if ingress.tls { "https" } else { "http" };
            format!("{scheme}://{}", ingress.host)
        } else {
            instance.internal_url()
        };

        instance.status.admin_url = admin_url;
        Ok(StageOutcome::success())
    }
}

#[async_trait]
impl StageReconciler for NetworkingReconciler {
    fn stage(&self) -> StageName {
        StageName::Networking
    }

    async fn reconcile(
        &self,
        _ctx: &RunContext,
        instance: &mut Grafana,
        vars: &mut ReconcileVars,
    ) -> StageOutcome {
        self.converge(instance, vars).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IngressSpec;
    use crate::cluster::InMemoryCluster;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_internal_admin_url_without_ingress() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = NetworkingReconciler::new(cluster.clone());
        let mut instance = Grafana::new("monitoring", "main");
        let mut vars = ReconcileVars::new();

        let outcome = reconciler
            .reconcile(&RunContext::new(), &mut instance, &mut vars)
            .await;
        assert!(matches!(outcome, StageOutcome::Success));

        assert_eq!(
            instance.status.admin_url,
            "http://main-service.monitoring.svc.cluster.local:3000"
        );
        assert_eq!(
            vars.service_hostname.as_deref(),
            Some("main-service.monitoring.svc.cluster.local")
        );
        assert!(cluster
            .resource(ResourceKind::Service, "monitoring", "main-service")
            .is_some());
        assert!(cluster
            .resource(ResourceKind::Ingress, "monitoring", "main-ingress")
            .is_none());
    }

    #[tokio::test]
    async fn test_ingress_admin_url_honors_tls() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = NetworkingReconciler::new(cluster.clone());
        let mut instance = Grafana::new("monitoring", "main");
        instance.spec.ingress = Some(IngressSpec {
            host: "grafana.example".to_string(),
            tls: true,
        });

        reconciler
            .reconcile(&RunContext::new(), &mut instance, &mut ReconcileVars::new())
            .await;

        assert_eq!(instance.status.admin_url, "https://grafana.example");
        let ingress = cluster
            .resource(ResourceKind::Ingress, "monitoring", "main-ingress")
            .unwrap();
        assert_eq!(ingress.payload["spec"]["host"], "grafana.example");
    }

    #[tokio::test]
    async fn test_empty_ingress_host_fails() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = NetworkingReconciler::new(cluster);
        let mut instance = Grafana::new("monitoring", "main");
        instance.spec.ingress = Some(IngressSpec {
            host: String::new(),
            tls: false,
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
