//! The ordered convergence pipeline.
//!
//! Stages run strictly in [`StageName::ORDER`]. A stage that reports
//! in-progress halts the run without error so the caller can reschedule; a
//! stage failure halts the run with the failing stage recorded. Stage-local
//! state flows forward through [`ReconcileVars`] only.

use crate::api::Grafana;
use crate::cluster::ResourceStore;
use crate::context::RunContext;
use crate::errors::ConvergeError;
use crate::stages::{
    admin_user::AdminUserReconciler, complete::CompleteReconciler,
    config::ConfigReconciler, identity::IdentityReconciler,
    networking::NetworkingReconciler, plugins::PluginsReconciler,
    storage::StorageReconciler, workload::WorkloadReconciler,
};
use crate::stages::{ReconcileVars, StageName, StageOutcome, StageReconciler, StageStatus};
use std::collections::HashMap;
use std::sync::Arc;

/// The terminal state of one pipeline run.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// The last stage that ran.
    pub stage: StageName,
    /// How that stage ended.
    pub status: StageStatus,
    /// Progress message for in-progress stages, empty otherwise.
    pub message: String,
    /// The failure, when the run failed.
    pub error: Option<ConvergeError>,
}

impl PipelineOutcome {
    /// Whether every stage converged.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stage == StageName::Complete && self.status == StageStatus::Success
    }
}

/// Runs registered stage reconcilers in pipeline order.
pub struct ConvergencePipeline {
    stages: HashMap<StageName, Arc<dyn StageReconciler>>,
}

impl ConvergencePipeline {
    /// Creates an empty pipeline with no stages registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }

    /// Creates a pipeline with the full managed-instance stage set.
    #[must_use]
    pub fn with_default_stages(resources: Arc<dyn ResourceStore>) -> Self {
        Self::new()
            .register(Arc::new(AdminUserReconciler::new(Arc::clone(&resources))))
            .register(Arc::new(ConfigReconciler::new(Arc::clone(&resources))))
            .register(Arc::new(StorageReconciler::new(Arc::clone(&resources))))
            .register(Arc::new(IdentityReconciler::new(Arc::clone(&resources))))
            .register(Arc::new(NetworkingReconciler::new(Arc::clone(&resources))))
            .register(Arc::new(PluginsReconciler::new()))
            .register(Arc::new(WorkloadReconciler::new(resources)))
            .register(Arc::new(CompleteReconciler::new()))
    }

    /// Registers a reconciler under its own stage name, replacing any
    /// previous registration for that stage.
    #[must_use]
    pub fn register(mut self, reconciler: Arc<dyn StageReconciler>) -> Self {
        self.stages.insert(reconciler.stage(), reconciler);
        self
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stage is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs the pipeline over the instance.
    ///
    /// The instance's status records the current stage before each
    /// reconciler is invoked, so an interrupted run still shows where it
    /// stopped. Stages without a registered reconciler are skipped.
    pub async fn run(
        &self,
        ctx: &RunContext,
        instance: &mut Grafana,
    ) -> Result<PipelineOutcome, ConvergeError> {
        let mut vars = ReconcileVars::new();
        let mut last_stage = StageName::Complete;

        for stage in StageName::ORDER {
            ctx.ensure_active()?;

            let Some(reconciler) = self.stages.get(&stage) else {
                tracing::debug!(stage = %stage, "no reconciler registered, skipping");
                continue;
            };
            last_stage = stage;

            instance.status.stage = Some(stage);
            instance.status.stage_status = Some(StageStatus::InProgress);
            tracing::debug!(
                namespace = %instance.metadata.namespace,
                name = %instance.metadata.name,
                stage = %stage,
                "running stage",
            );

            match reconciler.reconcile(ctx, instance, &mut vars).await {
                StageOutcome::Success => {
                    instance.status.stage_status = Some(StageStatus::Success);
                }
                StageOutcome::InProgress(message) => {
                    tracing::info!(stage = %stage, %message, "stage not yet converged");
                    return Ok(PipelineOutcome {
                        stage,
                        status: StageStatus::InProgress,
                        message,
                        error: None,
                    });
                }
                StageOutcome::Failed(error) => {
                    instance.status.stage_status = Some(StageStatus::Failed);
                    let error = ConvergeError::stage(stage, error);
                    tracing::error!(stage = %stage, %error, "stage failed");
                    return Ok(PipelineOutcome {
                        stage,
                        status: StageStatus::Failed,
                        message: String::new(),
                        error: Some(error),
                    });
                }
            }
        }

        Ok(PipelineOutcome {
            stage: last_stage,
            status: StageStatus::Success,
            message: String::new(),
            error: None,
        })
    }
}

impl Default for ConvergencePipeline {
    fn default() -> Self {
        Self::new()
    }
}
