//! Plugin set stage.

use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::Grafana;
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Consolidates the declared plugin set into the install list consumed by
/// the workload stage.
///
/// Plugins are deduplicated by name and sorted, so the resulting string is
/// stable across runs and spec reorderings. This stage mutates no managed
/// resource; its output travels entirely through the cross-stage variables.
#[derive(Debug, Default)]
pub struct PluginsReconciler;

impl PluginsReconciler {
    /// Creates the reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn converge(
        instance: &Grafana,
        vars: &mut ReconcileVars,
    ) -> Result<StageOutcome, ConvergeError> {
        if instance.spec.plugins.is_empty() {
            vars.plugins = None;
            return Ok(StageOutcome::success());
        }

        let mut consolidated: BTreeMap<&str, &str> = BTreeMap::new();
        for plugin in &instance.spec.plugins {
            let name = plugin.name.trim();
            let version = plugin.version.trim();
            if name.is_empty() || version.is_empty() {
                return Err(ConvergeError::InvalidSpec(
                    "plugin entries require a name and a version".to_string(),
                ));
            }
            if name.contains(',') || name.contains(char::is_whitespace) {
                return Err(ConvergeError::InvalidSpec(format!(
                    "malformed plugin name '{name}'"
                )));
            }

            if let Some(existing) = consolidated.get(name) {
                if *existing != version {
                    return Err(ConvergeError::InvalidSpec(format!(
                        "plugin '{name}' declared with conflicting versions"
                    )));
                }
            }
            consolidated.insert(name, version);
        }

        let list = consolidated
            .iter()
            .map(|(name, version)| format!("{name} {version}"))
            .collect::<Vec<_>>()
            .join(",");
        vars.plugins = Some(list);
        Ok(StageOutcome::success())
    }
}

#[async_trait]
impl StageReconciler for PluginsReconciler {
    fn stage(&self) -> StageName {
        StageName::Plugins
    }

    async fn reconcile(
        &self,
        _ctx: &RunContext,
        instance: &mut Grafana,
        vars: &mut ReconcileVars,
    ) -> StageOutcome {
        Self::converge(instance, vars).into()
    }
}
