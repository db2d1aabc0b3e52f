//! Reconcile counters.

use crate::stages::StageName;
use dashmap::DashMap;

type InstanceKey = (String, String);

/// Per-instance reconcile and failure counters.
///
/// Counters are keyed by namespace and name, with failures additionally
/// recording the stage they happened in. The controller bumps these on every
/// run; they back both the failure backoff and operator dashboards.
#[derive(Debug, Default)]
pub struct Metrics {
    reconciles: DashMap<InstanceKey, u64>,
    failures: DashMap<(String, String, Option<StageName>), u64>,
}

impl Metrics {
    /// Creates empty counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one reconcile attempt for an instance.
    pub fn observe_reconcile(&self, namespace: &str, name: &str) {
        *self
            .reconciles
            .entry((namespace.to_string(), name.to_string()))
            .or_insert(0) += 1;
    }

    /// Counts one failed reconcile, attributed to the failing stage when
    /// known.
    pub fn observe_failure(&self, namespace: &str, name: &str, stage: Option<StageName>) {
        *self
            .failures
            .entry((namespace.to_string(), name.to_string(), stage))
            .or_insert(0) += 1;
    }

    /// Reconcile count for an instance.
    #[must_use]
    pub fn reconciles(&self, namespace: &str, name: &str) -> u64 {
        self.reconciles
            .get(&(namespace.to_string(), name.to_string()))
            .map_or(0, |count| *count)
    }

    /// Failure count for an instance and stage.
    #[must_use]
    pub fn failures(&self, namespace: &str, name: &str, stage: Option<StageName>) -> u64 {
        self.failures
            .get(&(namespace.to_string(), name.to_string(), stage))
            .map_or(0, |count| *count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counters_accumulate_per_instance() {
        let metrics = Metrics::new();
        metrics.observe_reconcile("monitoring", "main");
        metrics.observe_reconcile("monitoring", "main");
        metrics.observe_reconcile("monitoring", "other");

        assert_eq!(metrics.reconciles("monitoring", "main"), 2);
        assert_eq!(metrics.reconciles("monitoring", "other"), 1);
        assert_eq!(metrics.reconciles("monitoring", "absent"), 0);
    }

    #[test]
    fn test_failures_attribute_the_stage() {
        let metrics = Metrics::new();
        metrics.observe_failure("monitoring", "main", Some(StageName::Workload));
        metrics.observe_failure("monitoring", "main", None);

        assert_eq!(
            metrics.failures("monitoring", "main", Some(StageName::Workload)),
            1
        );
        assert_eq!(metrics.failures("monitoring", "main", None), 1);
        assert_eq!(
            metrics.failures("monitoring", "main", Some(StageName::Config)),
            0
        );
    }
}
