//! Workload deployment stage.

use super::admin_user::{ADMIN_PASSWORD_KEY, ADMIN_USER_KEY};
use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::Grafana;
use crate::cluster::{ManagedResource, ResourceKind, ResourceStore};
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Annotation stamping the rendered config digest onto the pod template so
/// configuration changes roll the workload.
pub const CONFIG_HASH_ANNOTATION: &str = "converge.grafana/config-hash";

/// Ensures the instance deployment.
///
/// Consumes the cross-stage variables published by every earlier stage:
/// admin credentials (env wired through the credential secret), the config
/// digest, and the plugin install list. A rollout the cluster reports as
/// incomplete is a waiting condition.
pub struct WorkloadReconciler {
    resources: Arc<dyn ResourceStore>,
}

impl WorkloadReconciler {
    /// Creates the reconciler over the managed-resource store.
    #[must_use]
    pub fn new(resources: Arc<dyn ResourceStore>) -> Self {
        Self { resources }
    }

    async fn converge(
        &self,
        instance: &Grafana,
        vars: &ReconcileVars,
    ) -> Result<StageOutcome, ConvergeError> {
        let Some(image) = instance.image_ref() else {
            return Err(ConvergeError::InvalidSpec(
                "spec version is not pinned".to_string(),
            ));
        };
        if vars.admin_user.is_none() || vars.admin_password.is_none() {
            return Err(ConvergeError::InvalidSpec(
                "admin credentials were not initialized by an earlier stage".to_string(),
            ));
        }

        let secret_name = instance.admin_secret_name();
        let mut env = vec![
            secret_env(ADMIN_USER_KEY, &secret_name),
            secret_env(ADMIN_PASSWORD_KEY, &secret_name),
        ];
        if let Some(plugins) = &vars.plugins {
            env.push(json!({ "name": "GF_INSTALL_PLUGINS", "value": plugins }));
        }
        if let Some(host) = &vars.service_hostname {
            env.push(json!({ "name": "GF_SERVER_DOMAIN", "value": host }));
        }

        let mut template_spec = json!({
            "serviceAccountName": instance.service_account_name(),
            "containers": [{
                "name": "grafana",
                "image": image,
                "env": env,
                "volumeMounts": [{
                    "name": "config",
                    "mountPath": "/etc/grafana",
                }],
            }],
            "volumes": [{
                "name": "config",
                "configMap": { "name": instance.config_map_name() },
            }],
        });
        if instance.spec.persistence.is_some() {
            if let Some(mounts) =
                template_spec["containers"][0]["volumeMounts"].as_array_mut()
            {
                mounts.push(json!({
                    "name": "storage",
                    "mountPath": "/var/lib/grafana",
                }));
            }
            if let Some(volumes) = template_spec["volumes"].as_array_mut() {
                volumes.push(json!({
                    "name": "storage",
                    "persistentVolumeClaim": { "claimName": instance.pvc_name() },
                }));
            }
        }

        let namespace = &instance.metadata.namespace;
        let deployment_name = instance.deployment_name();
        self.resources
            .apply(ManagedResource::new(
                ResourceKind::Deployment,
                namespace.clone(),
                deployment_name.clone(),
                instance.metadata.name.clone(),
                json!({
                    "spec": {
                        "replicas": 1,
                        "selector": { "app": instance.metadata.name },
                        "template": {
                            "metadata": {
                                "annotations": {
                                    CONFIG_HASH_ANNOTATION:
                                        vars.config_hash.clone().unwrap_or_default(),
                                },
                            },
                            "spec": template_spec,
                        },
                    },
                }),
            ))
            .await?;

        let deployment = self
            .resources
            .get(ResourceKind::Deployment, namespace, &deployment_name)
            .await?;
        let ready = deployment
            .as_ref()
            .and_then(|d| d.payload.get("status"))
            .and_then(|s| s.get("readyReplicas"))
            .and_then(serde_json::Value::as_u64);
        if ready == Some(0) {
            return Ok(StageOutcome::in_progress("waiting for workload rollout"));
        }

        Ok(StageOutcome::success())
    }
}

fn secret_env(key: &str, secret_name: &str) -> serde_json::Value {
    json!({
        "name": key,
        "valueFrom": {
            "secretKeyRef": { "name": secret_name, "key": key },
        },
    })
}

#[async_trait]
impl StageReconciler for WorkloadReconciler {
    fn stage(&self) -> StageName {
        StageName::Workload
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
