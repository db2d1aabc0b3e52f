//! Instance configuration stage.

use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::Grafana;
use crate::cluster::{ManagedResource, ResourceKind, ResourceStore};
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// File name of the rendered configuration inside the config map.
pub const CONFIG_FILE_NAME: &str = "grafana.ini";

/// Renders the instance configuration, hashes it, and applies the config
/// map.
///
/// The rendered file is deterministic (sections and keys in sorted order)
/// so the hash published into the cross-stage variables only changes when
/// the effective configuration changes.
pub struct ConfigReconciler {
    resources: Arc<dyn ResourceStore>,
}

impl ConfigReconciler {
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
        let ini = render_ini(&instance.spec.config);
        let hash = hex::encode(Sha256::digest(ini.as_bytes()));

        self.resources
            .apply(ManagedResource::new(
                ResourceKind::ConfigMap,
                instance.metadata.namespace.clone(),
                instance.config_map_name(),
                instance.metadata.name.clone(),
                serde_json::json!({
                    "data": { CONFIG_FILE_NAME: ini },
                }),
            ))
            .await?;

        vars.config_hash = Some(hash);
        Ok(StageOutcome::success())
    }
}

fn default_sections() -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections = BTreeMap::new();
    sections.insert(
        "paths".to_string(),
        [
            ("data", "/var/lib/grafana"),
            ("logs", "/var/log/grafana"),
            ("plugins", "/var/lib/grafana/plugins"),
            ("provisioning", "/etc/grafana/provisioning"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    );
    sections.insert(
        "log".to_string(),
        [("mode".to_string(), "console".to_string())]
            .into_iter()
            .collect(),
    );
    sections
}

/// Renders the effective ini file: build defaults overlaid with the spec's
/// config overrides, in stable order.
#[must_use]
pub fn render_ini(overrides: &BTreeMap<String, BTreeMap<String, String>>) -> String {
    let mut sections = default_sections();
    for (section, keys) in overrides {
        let merged = sections.entry(section.clone()).or_default();
        for (key, value) in keys {
            merged.insert(key.clone(), value.clone());
        }
    }

    let mut out = String::new();
    for (section, keys) in &sections {
        let _ = writeln!(out, "[{section}]");
        for (key, value) in keys {
            let _ = writeln!(out, "{key} = {value}");
        }
        out.push('\n');
    }
    out
}

#[async_trait]
impl StageReconciler for ConfigReconciler {
    fn stage(&self) -> StageName {
        StageName::Config
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
