//! Admin credential stage.

use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::Grafana;
use crate::cluster::{ManagedResource, ResourceKind, ResourceStore};
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

/// Secret key holding the admin user name.
pub const ADMIN_USER_KEY: &str = "GF_SECURITY_ADMIN_USER";
/// Secret key holding the admin password.
pub const ADMIN_PASSWORD_KEY: &str = "GF_SECURITY_ADMIN_PASSWORD";

const DEFAULT_ADMIN_USER: &str = "admin";
const GENERATED_PASSWORD_LEN: usize = 32;

/// Ensures the admin credential secret exists and publishes the credentials
/// into the cross-stage variables.
///
/// An existing secret is reused so the password stays stable across runs;
/// spec config overrides under `[security]` win over both.
pub struct AdminUserReconciler {
    resources: Arc<dyn ResourceStore>,
}

impl AdminUserReconciler {
    /// Creates the reconciler over the managed-resource store.
    #[must_use]
    pub fn new(resources: Arc<dyn ResourceStore>) -> Self {
        Self { resources }
    }

    async fn converge(
        &self,
        instance: &Grafana,
        vars: &mut ReconcileVars,
    ) -> Result<StageOutcome, ConvergeError> {
        let namespace = &instance.metadata.namespace;
        let secret_name = instance.admin_secret_name();

        let existing = self
            .resources
            .get(ResourceKind::Secret, namespace, &secret_name)
            .await?;

        let security = instance.spec.config.get("security");
        let user = security
            .and_then(|s| s.get("admin_user").cloned())
            .or_else(|| secret_value(existing.as_ref(), ADMIN_USER_KEY))
            .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string());
        let password = security
            .and_then(|s| s.get("admin_password").cloned())
            .or_else(|| secret_value(existing.as_ref(), ADMIN_PASSWORD_KEY))
            .unwrap_or_else(generate_password);

        self.resources
            .apply(ManagedResource::new(
                ResourceKind::Secret,
                namespace.clone(),
                secret_name,
                instance.metadata.name.clone(),
                serde_json::json!({
                    "data": {
                        ADMIN_USER_KEY: user,
                        ADMIN_PASSWORD_KEY: password,
                    },
                }),
            ))
            .await?;

        vars.admin_user = Some(user);
        vars.admin_password = Some(password);
        Ok(StageOutcome::success())
    }
}

fn secret_value(resource: Option<&ManagedResource>, key: &str) -> Option<String> {
    resource?
        .payload
        .get("data")?
        .get(key)?
        .as_str()
        .map(ToString::to_string)
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[async_trait]
impl StageReconciler for AdminUserReconciler {
    fn stage(&self) -> StageName {
        StageName::AdminUser
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
