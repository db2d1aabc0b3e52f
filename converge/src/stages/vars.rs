//! Shared cross-stage variables.

/// Values computed by earlier stages for consumption by later ones.
///
/// One instance is owned by a single run, rebuilt fresh on every reconcile
/// invocation, and never shared across concurrent runs. Fields are explicit
/// and typed so a stage reading a value a predecessor never wrote fails
/// loudly instead of propagating a silent blank.
#[derive(Debug, Clone, Default)]
pub struct ReconcileVars {
    /// Admin user name published by the admin-user stage.
    pub admin_user: Option<String>,
    /// Admin password published by the admin-user stage.
    pub admin_password: Option<String>,
    /// Digest of the rendered configuration, published by the config stage
    /// and stamped onto the workload so config changes roll the pods.
    pub config_hash: Option<String>,
    /// Consolidated plugin install list published by the plugins stage.
    pub plugins: Option<String>,
    /// Cluster-internal service host published by the networking stage and
    /// wired into the workload's server-domain env.
    pub service_hostname: Option<String>,
}

impl ReconcileVars {
    /// Creates an empty variable set for a fresh run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
