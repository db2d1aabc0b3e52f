//! Terminal completion stage.

use super::{ReconcileVars, StageName, StageOutcome, StageReconciler};
use crate::api::Grafana;
use crate::context::RunContext;
use async_trait::async_trait;
use tracing::debug;

/// The pipeline's success sentinel. Performs no resource mutation.
#[derive(Debug, Default)]
pub struct CompleteReconciler;

impl CompleteReconciler {
    /// Creates the reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageReconciler for CompleteReconciler {
    fn stage(&self) -> StageName {
        StageName::Complete
    }

    async fn reconcile(
        &self,
        _ctx: &RunContext,
        instance: &mut Grafana,
        _vars: &mut ReconcileVars,
    ) -> StageOutcome {
        debug!(
            namespace = %instance.metadata.namespace,
            name = %instance.metadata.name,
            "instance converged",
        );
        StageOutcome::success()
    }
}
