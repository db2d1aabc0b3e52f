//! Stage reconcilers and the per-stage contract.
//!
//! Stages are the units of convergence. Each reconciler owns exactly one
//! class of managed sub-resource, is idempotent, and reports its outcome
//! instead of erroring the pipeline directly: a transient dependency that is
//! not ready yet is [`StageOutcome::InProgress`], an irrecoverable
//! misconfiguration is [`StageOutcome::Failed`].

pub mod admin_user;
pub mod complete;
pub mod config;
pub mod identity;
pub mod networking;
pub mod plugins;
pub mod storage;
mod vars;
pub mod workload;

pub use vars::ReconcileVars;

use crate::api::Grafana;
use crate::context::RunContext;
use crate::errors::ConvergeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named convergence stages, in their fixed execution order.
///
/// The order is invariant and total: every run visits stages in exactly this
/// sequence, and a stage is skipped only when no reconciler is registered
/// for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Admin credential secret.
    AdminUser,
    /// Instance configuration file.
    Config,
    /// Persistent storage claim.
    Storage,
    /// Workload identity.
    Identity,
    /// Service and ingress exposure.
    Networking,
    /// Plugin install set.
    Plugins,
    /// Workload deployment.
    Workload,
    /// Terminal success sentinel.
    Complete,
}

impl StageName {
    /// The fixed execution order of all stages.
    pub const ORDER: [StageName; 8] = [
        StageName::AdminUser,
        StageName::Config,
        StageName::Storage,
        StageName::Identity,
        StageName::Networking,
        StageName::Plugins,
        StageName::Workload,
        StageName::Complete,
    ];

    /// Returns the stage name as its wire form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminUser => "admin-user",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Identity => "identity",
            Self::Networking => "networking",
            Self::Plugins => "plugins",
            Self::Workload => "workload",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The recorded result of a stage (and of the run as a whole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage converged.
    Success,
    /// The stage is waiting on a dependency; the run should be rescheduled.
    InProgress,
    /// The stage cannot converge.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::InProgress => f.write_str("in_progress"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Outcome returned by one stage reconciler.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage converged; the pipeline proceeds.
    Success,
    /// The stage is waiting on a dependency. This halts the pipeline for
    /// the current run without raising an error; the message explains what
    /// is being waited for.
    InProgress(String),
    /// The stage cannot converge. This halts the pipeline and propagates
    /// the error, wrapped with the stage's name.
    Failed(ConvergeError),
}

impl StageOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn success() -> Self {
        Self::Success
    }

    /// A waiting outcome with a human-readable reason.
    #[must_use]
    pub fn in_progress(message: impl Into<String>) -> Self {
        Self::InProgress(message.into())
    }

    /// A failed outcome carrying its cause.
    #[must_use]
    pub fn failed(error: ConvergeError) -> Self {
        Self::Failed(error)
    }

    /// Projects the outcome into the status recorded on the instance.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        match self {
            Self::Success => StageStatus::Success,
            Self::InProgress(_) => StageStatus::InProgress,
            Self::Failed(_) => StageStatus::Failed,
        }
    }
}

impl From<Result<StageOutcome, ConvergeError>> for StageOutcome {
    fn from(result: Result<StageOutcome, ConvergeError>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(error) => Self::Failed(error),
        }
    }
}

/// Trait for stage reconcilers.
///
/// Implementations must be idempotent: re-running with identical inputs and
/// identical actual state produces no observable change. A reconciler reads
/// only the desired-state fields relevant to its concern and only
/// cross-stage variables placed by earlier stages.
#[async_trait]
pub trait StageReconciler: Send + Sync {
    /// The stage this reconciler converges.
    fn stage(&self) -> StageName;

    /// Converges the stage's managed sub-resource.
    async fn reconcile(
        &self,
        ctx: &RunContext,
        instance: &mut Grafana,
        vars: &mut ReconcileVars,
    ) -> StageOutcome;
}
