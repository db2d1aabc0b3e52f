//! # Converge
//!
//! A staged convergence engine for cluster-managed Grafana instances.
//!
//! Converge continuously drives a declared `Grafana` instance toward its
//! desired state by running an ordered pipeline of stage reconcilers:
//!
//! - **Stage-based convergence**: one reconciler per concern (credentials,
//!   configuration, storage, identity, networking, plugins, workload)
//! - **Fail-fast pipeline**: a failed stage aborts the run with the stage
//!   name attached; a waiting stage asks for rescheduling instead
//! - **Content hashing**: datasource payloads carry a deterministic digest
//!   so unchanged content is never pushed twice
//! - **External probing**: unmanaged instances are observed through their
//!   administrative HTTP API instead of being converged
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use converge::prelude::*;
//! use std::sync::Arc;
//!
//! let cluster = Arc::new(InMemoryCluster::new());
//! let controller = GrafanaController::new(
//!     cluster.clone(),
//!     cluster.clone(),
//!     cluster.clone(),
//!     ControllerConfig::from_env(),
//! );
//!
//! let action = controller.reconcile(&RunContext::new(), "monitoring", "main").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod api;
pub mod cancellation;
pub mod client;
pub mod cluster;
pub mod config;
pub mod content;
pub mod context;
pub mod controller;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod stages;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api::{
        External, Grafana, GrafanaDatasource, GrafanaSpec, GrafanaStatus,
        SecretKeySelector,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::client::{HttpVersionProbe, InstanceClient, VersionProbe};
    pub use crate::cluster::{
        InMemoryCluster, InstanceStore, ManagedResource, ResourceKind,
        ResourceStore, SecretStore, StoreError,
    };
    pub use crate::config::ControllerConfig;
    pub use crate::content::{ContentModelBuilder, DatasourceModel};
    pub use crate::context::RunContext;
    pub use crate::controller::{Action, GrafanaController};
    pub use crate::errors::ConvergeError;
    pub use crate::metrics::Metrics;
    pub use crate::pipeline::{ConvergencePipeline, PipelineOutcome};
    pub use crate::stages::{
        ReconcileVars, StageName, StageOutcome, StageReconciler, StageStatus,
    };
}
