//! The top-level reconcile entrypoint.
//!
//! One [`GrafanaController::reconcile`] call drives one instance toward its
//! desired state: load, converge, record. The observed status is persisted
//! at the end of every run, successful or not, so operators always see where
//! the run stopped and why.

use crate::api::Grafana;
use crate::client::VersionProbe;
use crate::cluster::{InstanceStore, ResourceStore, SecretStore};
use crate::config::ControllerConfig;
use crate::context::RunContext;
use crate::errors::ConvergeError;
use crate::metrics::Metrics;
use crate::pipeline::ConvergencePipeline;
use crate::stages::{StageName, StageStatus};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod integration_tests;

/// Cap on the persisted status message length, in characters.
const MAX_STATUS_MESSAGE_CHARS: usize = 1024;

/// What the caller should do after a reconcile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The instance converged (or no longer exists); no follow-up needed
    /// until its desired state changes.
    Done,
    /// Run again after the delay.
    Requeue(Duration),
}

/// Drives instances toward their desired state.
pub struct GrafanaController {
    instances: Arc<dyn InstanceStore>,
    pipeline: ConvergencePipeline,
    probe: Arc<dyn VersionProbe>,
    config: ControllerConfig,
    metrics: Arc<Metrics>,
    failures: DashMap<(String, String), u32>,
}

impl GrafanaController {
    /// Creates a controller with the default stage set and HTTP probe.
    #[must_use]
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        secrets: Arc<dyn SecretStore>,
        resources: Arc<dyn ResourceStore>,
        config: ControllerConfig,
    ) -> Self {
        let probe = Arc::new(crate::client::HttpVersionProbe::new(secrets));
        Self::with_parts(
            instances,
            ConvergencePipeline::with_default_stages(resources),
            probe,
            config,
        )
    }

    /// Creates a controller from explicit collaborators.
    #[must_use]
    pub fn with_parts(
        instances: Arc<dyn InstanceStore>,
        pipeline: ConvergencePipeline,
        probe: Arc<dyn VersionProbe>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            instances,
            pipeline,
            probe,
            config,
            metrics: Arc::new(Metrics::new()),
            failures: DashMap::new(),
        }
    }

    /// The controller's counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Reconciles one instance by namespace and name.
    ///
    /// A vanished instance is a successful no-op. A converged run returns
    /// [`Action::Done`]; a run waiting on a dependency or recovering from a
    /// failure returns [`Action::Requeue`] with the appropriate delay.
    /// Whatever happens, the instance's status is persisted before
    /// returning.
    pub async fn reconcile(
        &self,
        ctx: &RunContext,
        namespace: &str,
        name: &str,
    ) -> Result<Action, ConvergeError> {
        self.metrics.observe_reconcile(namespace, name);

        let Some(mut instance) = self.instances.get(namespace, name).await? else {
            tracing::debug!(%namespace, %name, "instance is gone, nothing to do");
            self.failures.remove(&(namespace.to_string(), name.to_string()));
            return Ok(Action::Done);
        };

        let converged = self.converge(ctx, &mut instance).await;

        let action = match &converged {
            Ok(action) => {
                self.failures
                    .remove(&(namespace.to_string(), name.to_string()));
                *action
            }
            Err(error) => {
                instance.status.stage_status = Some(StageStatus::Failed);
                instance.status.last_message = truncate_message(&error.to_string());
                self.metrics
                    .observe_failure(namespace, name, error.failed_stage());

                let mut failures = self
                    .failures
                    .entry((namespace.to_string(), name.to_string()))
                    .or_insert(0);
                *failures += 1;
                let delay = self.config.backoff_for(*failures);
                tracing::error!(
                    %namespace,
                    %name,
                    failures = *failures,
                    %error,
                    "reconcile failed, backing off",
                );
                Action::Requeue(delay)
            }
        };

        // The status write happens on every path, even after a failure.
        self.persist_status(&instance).await?;
        Ok(action)
    }

    /// Runs one convergence pass over a loaded instance.
    ///
    /// External instances skip the pipeline entirely: they are only probed
    /// and their observed version and URL recorded. Managed instances get
    /// their version pinned, then run the full stage pipeline, and are
    /// probed once the pipeline completes.
    async fn converge(
        &self,
        ctx: &RunContext,
        instance: &mut Grafana,
    ) -> Result<Action, ConvergeError> {
        if instance.is_external() {
            return self.converge_external(ctx, instance).await;
        }

        self.pin_version(instance).await?;

        let outcome = self.pipeline.run(ctx, instance).await?;
        if let Some(error) = outcome.error {
            return Err(error);
        }
        if outcome.status == StageStatus::InProgress {
            instance.status.last_message = truncate_message(&outcome.message);
            return Ok(Action::Requeue(self.config.requeue_in_progress));
        }

        instance.status.version = self.probe_version(ctx, instance).await?;
        instance.status.last_message = String::new();
        Ok(Action::Done)
    }

    /// Probes the running instance, clearing the recorded version on
    /// failure so a stale detection never outlives a broken probe.
    async fn probe_version(
        &self,
        ctx: &RunContext,
        instance: &mut Grafana,
    ) -> Result<String, ConvergeError> {
        match self.probe.probe(ctx, instance).await {
            Ok(version) => Ok(version),
            Err(error) => {
                instance.status.version = String::new();
                Err(error)
            }
        }
    }

    async fn converge_external(
        &self,
        ctx: &RunContext,
        instance: &mut Grafana,
    ) -> Result<Action, ConvergeError> {
        // The spec URL is authoritative on every pass so an edited URL is
        // picked up by the next probe.
        if let Some(external) = &instance.spec.external {
            if !external.url.is_empty() {
                instance.status.admin_url = external.url.trim_end_matches('/').to_string();
            }
        }
        instance.status.stage = Some(StageName::Complete);

        instance.status.version = self.probe_version(ctx, instance).await?;
        instance.status.stage_status = Some(StageStatus::Success);
        instance.status.last_message = String::new();
        Ok(Action::Done)
    }

    /// Pins an unversioned spec to the configured version.
    ///
    /// The pin is written back to the spec so the choice is visible and
    /// stable across runs.
    async fn pin_version(&self, instance: &mut Grafana) -> Result<(), ConvergeError> {
        let unpinned = instance
            .spec
            .version
            .as_deref()
            .map_or(true, str::is_empty);
        if !unpinned {
            return Ok(());
        }

        let version = self.config.pinned_version();
        tracing::info!(
            namespace = %instance.metadata.namespace,
            name = %instance.metadata.name,
            %version,
            "pinning unversioned instance",
        );
        instance.spec.version = Some(version);
        *instance = self.instances.update_spec(instance).await?;
        Ok(())
    }

    /// Persists the instance's status, retrying lost write races.
    ///
    /// On conflict the object is re-fetched and this run's status re-applied
    /// on top. An instance deleted mid-run is not an error.
    async fn persist_status(&self, instance: &Grafana) -> Result<(), ConvergeError> {
        let mut current = instance.clone();
        for _ in 0..=self.config.conflict_retries {
            match self.instances.update_status(&current).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_conflict() => {
                    let Some(mut fresh) = self
                        .instances
                        .get(&instance.metadata.namespace, &instance.metadata.name)
                        .await?
                    else {
                        return Ok(());
                    };
                    fresh.status = instance.status.clone();
                    current = fresh;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ConvergeError::Store(crate::cluster::StoreError::Conflict {
            kind: "Grafana".to_string(),
            namespace: instance.metadata.namespace.clone(),
            name: instance.metadata.name.clone(),
        }))
    }
}

/// Truncates a status message to a bounded number of characters.
fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_STATUS_MESSAGE_CHARS {
        return message.to_string();
    }
    message.chars().take(MAX_STATUS_MESSAGE_CHARS).collect()
}
