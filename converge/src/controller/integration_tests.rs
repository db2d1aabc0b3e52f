//! End-to-end reconcile runs against the in-memory cluster.

use super::*;
use crate::api::External;
use crate::cluster::{InMemoryCluster, ResourceKind};
use crate::config::DEFAULT_GRAFANA_VERSION;
use async_trait::async_trait;
use pretty_assertions::assert_eq;

/// Probe answering with a fixed version.
struct StaticProbe(&'static str);

#[async_trait]
impl VersionProbe for StaticProbe {
    async fn probe(
        &self,
        _ctx: &RunContext,
        _instance: &Grafana,
    ) -> Result<String, ConvergeError> {
        Ok(self.0.to_string())
    }
}

/// Probe that always fails version detection.
struct FailingProbe;

#[async_trait]
impl VersionProbe for FailingProbe {
    async fn probe(
        &self,
        _ctx: &RunContext,
        _instance: &Grafana,
    ) -> Result<String, ConvergeError> {
        Err(ConvergeError::version_detection(ConvergeError::EmptyVersion))
    }
}

/// Probe that bumps the stored instance mid-run, so the controller's status
/// write loses the first race.
struct BumpingProbe {
    cluster: Arc<InMemoryCluster>,
}

#[async_trait]
impl VersionProbe for BumpingProbe {
    async fn probe(
        &self,
        _ctx: &RunContext,
        instance: &Grafana,
    ) -> Result<String, ConvergeError> {
        let stored = InstanceStore::get(
            self.cluster.as_ref(),
            &instance.metadata.namespace,
            &instance.metadata.name,
        )
        .await?
        .ok_or_else(|| ConvergeError::InvalidSpec("instance vanished".to_string()))?;
        self.cluster.put_instance(stored);
        Ok("10.2.0".to_string())
    }
}

fn controller_over(
    cluster: &Arc<InMemoryCluster>,
    probe: Arc<dyn VersionProbe>,
) -> GrafanaController {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let instances: Arc<dyn InstanceStore> = cluster.clone();
    let resources: Arc<dyn ResourceStore> = cluster.clone();
    GrafanaController::with_parts(
        instances,
        ConvergencePipeline::with_default_stages(resources),
        probe,
        ControllerConfig::default(),
    )
}

async fn stored(cluster: &Arc<InMemoryCluster>, namespace: &str, name: &str) -> Grafana {
    InstanceStore::get(cluster.as_ref(), namespace, name)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_external_instance_is_probed_not_managed() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut instance = Grafana::new("monitoring", "external");
    instance.spec.external = Some(External {
        url: "http://ext.example/grafana".to_string(),
        api_key: None,
        admin_user: None,
        admin_password: None,
    });
    cluster.put_instance(instance);

    let controller = controller_over(&cluster, Arc::new(StaticProbe("10.2.0")));
    let action = controller
        .reconcile(&RunContext::new(), "monitoring", "external")
        .await
        .unwrap();

    assert_eq!(action, Action::Done);
    let after = stored(&cluster, "monitoring", "external").await;
    assert_eq!(after.status.version, "10.2.0");
    assert_eq!(after.status.admin_url, "http://ext.example/grafana");
    assert_eq!(after.status.stage, Some(StageName::Complete));
    assert_eq!(after.status.stage_status, Some(StageStatus::Success));
    assert_eq!(after.status.last_message, "");
    // None of the managed sub-resources exist for an external instance.
    assert_eq!(cluster.resource_count(), 0);
}

#[tokio::test]
async fn test_external_url_change_is_recorded() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut instance = Grafana::new("monitoring", "external");
    instance.spec.external = Some(External {
        url: "http://old.example/grafana".to_string(),
        api_key: None,
        admin_user: None,
        admin_password: None,
    });
    cluster.put_instance(instance);
    let controller = controller_over(&cluster, Arc::new(StaticProbe("10.2.0")));
    let ctx = RunContext::new();

    controller.reconcile(&ctx, "monitoring", "external").await.unwrap();
    let first = stored(&cluster, "monitoring", "external").await;
    assert_eq!(first.status.admin_url, "http://old.example/grafana");

    // The user moves the instance; the recorded URL must follow the spec.
    let mut moved = first;
    moved.spec.external.as_mut().unwrap().url = "http://new.example/grafana".to_string();
    cluster.put_instance(moved);

    controller.reconcile(&ctx, "monitoring", "external").await.unwrap();
    let after = stored(&cluster, "monitoring", "external").await;
    assert_eq!(after.status.admin_url, "http://new.example/grafana");
}

#[tokio::test]
async fn test_failed_external_probe_still_reports_its_phase() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut instance = Grafana::new("monitoring", "external");
    instance.spec.external = Some(External {
        url: "http://ext.example/grafana".to_string(),
        api_key: None,
        admin_user: None,
        admin_password: None,
    });
    instance.status.version = "9.5.0".to_string();
    cluster.put_instance(instance);
    let controller = controller_over(&cluster, Arc::new(FailingProbe));

    let action = controller
        .reconcile(&RunContext::new(), "monitoring", "external")
        .await
        .unwrap();

    assert!(matches!(action, Action::Requeue(_)));
    let after = stored(&cluster, "monitoring", "external").await;
    assert_eq!(after.status.stage, Some(StageName::Complete));
    assert_eq!(after.status.stage_status, Some(StageStatus::Failed));
    assert_eq!(after.status.version, "");
    assert_eq!(after.status.admin_url, "http://ext.example/grafana");
}

#[tokio::test]
async fn test_managed_instance_converges_and_pins_version() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.put_instance(Grafana::new("monitoring", "main"));

    let controller = controller_over(&cluster, Arc::new(StaticProbe("10.4.3")));
    let action = controller
        .reconcile(&RunContext::new(), "monitoring", "main")
        .await
        .unwrap();

    assert_eq!(action, Action::Done);
    let after = stored(&cluster, "monitoring", "main").await;
    assert_eq!(after.spec.version.as_deref(), Some(DEFAULT_GRAFANA_VERSION));
    assert_eq!(after.status.stage, Some(StageName::Complete));
    assert_eq!(after.status.stage_status, Some(StageStatus::Success));
    assert_eq!(after.status.version, "10.4.3");
    assert_eq!(
        after.status.admin_url,
        "http://main-service.monitoring.svc.cluster.local:3000"
    );

    // Every default sub-resource except storage and ingress is materialized.
    for (kind, name) in [
        (ResourceKind::Secret, "main-admin-credentials"),
        (ResourceKind::ConfigMap, "main-ini"),
        (ResourceKind::ServiceAccount, "main-sa"),
        (ResourceKind::Service, "main-service"),
        (ResourceKind::Deployment, "main-deployment"),
    ] {
        assert!(
            cluster.resource(kind, "monitoring", name).is_some(),
            "missing {kind} '{name}'",
        );
    }
    assert!(cluster
        .resource(ResourceKind::PersistentVolumeClaim, "monitoring", "main-pvc")
        .is_none());
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.put_instance(Grafana::new("monitoring", "main"));
    let controller = controller_over(&cluster, Arc::new(StaticProbe("10.4.3")));
    let ctx = RunContext::new();

    controller.reconcile(&ctx, "monitoring", "main").await.unwrap();
    let first = stored(&cluster, "monitoring", "main").await;
    let first_secret = cluster
        .resource(ResourceKind::Secret, "monitoring", "main-admin-credentials")
        .unwrap();

    controller.reconcile(&ctx, "monitoring", "main").await.unwrap();
    let second = stored(&cluster, "monitoring", "main").await;
    let second_secret = cluster
        .resource(ResourceKind::Secret, "monitoring", "main-admin-credentials")
        .unwrap();

    assert_eq!(first.spec, second.spec);
    assert_eq!(first.status, second.status);
    // The generated admin password survives re-runs.
    assert_eq!(first_secret.payload, second_secret.payload);
}

#[tokio::test]
async fn test_pending_storage_reschedules_without_error() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut instance = Grafana::new("monitoring", "main");
    instance.spec.persistence = Some(crate::api::PersistenceSpec {
        size: "10Gi".to_string(),
        storage_class: None,
    });
    cluster.put_instance(instance);
    let controller = controller_over(&cluster, Arc::new(StaticProbe("10.4.3")));
    let ctx = RunContext::new();

    // First run creates the claim; the cluster then reports it pending.
    controller.reconcile(&ctx, "monitoring", "main").await.unwrap();
    cluster.set_resource_status(
        ResourceKind::PersistentVolumeClaim,
        "monitoring",
        "main-pvc",
        serde_json::json!({"phase": "Pending"}),
    );

    let action = controller.reconcile(&ctx, "monitoring", "main").await.unwrap();
    assert_eq!(
        action,
        Action::Requeue(ControllerConfig::default().requeue_in_progress)
    );
    let waiting = stored(&cluster, "monitoring", "main").await;
    assert_eq!(waiting.status.stage, Some(StageName::Storage));
    assert_eq!(waiting.status.stage_status, Some(StageStatus::InProgress));
    assert_eq!(waiting.status.last_message, "waiting for PVC binding");

    // Binding completes; the next run converges fully.
    cluster.set_resource_status(
        ResourceKind::PersistentVolumeClaim,
        "monitoring",
        "main-pvc",
        serde_json::json!({"phase": "Bound"}),
    );
    let action = controller.reconcile(&ctx, "monitoring", "main").await.unwrap();
    assert_eq!(action, Action::Done);
    let bound = stored(&cluster, "monitoring", "main").await;
    assert_eq!(bound.status.stage, Some(StageName::Complete));
    assert_eq!(bound.status.last_message, "");
}

#[tokio::test]
async fn test_failed_probe_backs_off_and_records_status() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut instance = Grafana::new("monitoring", "main");
    instance.status.version = "9.5.0".to_string();
    cluster.put_instance(instance);
    let controller = controller_over(&cluster, Arc::new(FailingProbe));
    let ctx = RunContext::new();
    let config = ControllerConfig::default();

    let action = controller.reconcile(&ctx, "monitoring", "main").await.unwrap();
    assert_eq!(action, Action::Requeue(config.backoff_for(1)));

    let after = stored(&cluster, "monitoring", "main").await;
    assert_eq!(after.status.stage_status, Some(StageStatus::Failed));
    assert!(after.status.last_message.contains("version detection failed"));
    // A broken probe must not leave a stale detection behind.
    assert_eq!(after.status.version, "");
    assert_eq!(controller.metrics().failures("monitoring", "main", None), 1);

    // Consecutive failures widen the delay.
    let action = controller.reconcile(&ctx, "monitoring", "main").await.unwrap();
    assert_eq!(action, Action::Requeue(config.backoff_for(2)));
}

#[tokio::test]
async fn test_failed_stage_is_attributed_in_metrics() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut instance = Grafana::new("monitoring", "main");
    // An empty persistence size is an irrecoverable misconfiguration.
    instance.spec.persistence = Some(crate::api::PersistenceSpec {
        size: String::new(),
        storage_class: None,
    });
    cluster.put_instance(instance);
    let controller = controller_over(&cluster, Arc::new(StaticProbe("10.4.3")));

    let action = controller
        .reconcile(&RunContext::new(), "monitoring", "main")
        .await
        .unwrap();

    assert!(matches!(action, Action::Requeue(_)));
    assert_eq!(
        controller
            .metrics()
            .failures("monitoring", "main", Some(StageName::Storage)),
        1
    );
    let after = stored(&cluster, "monitoring", "main").await;
    assert_eq!(after.status.stage, Some(StageName::Storage));
    assert_eq!(after.status.stage_status, Some(StageStatus::Failed));
    assert!(after.status.last_message.contains("stage 'storage'"));
}

#[tokio::test]
async fn test_status_write_race_is_retried() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.put_instance(Grafana::new("monitoring", "main"));
    let probe = Arc::new(BumpingProbe {
        cluster: Arc::clone(&cluster),
    });
    let controller = controller_over(&cluster, probe);

    let action = controller
        .reconcile(&RunContext::new(), "monitoring", "main")
        .await
        .unwrap();

    assert_eq!(action, Action::Done);
    let after = stored(&cluster, "monitoring", "main").await;
    assert_eq!(after.status.version, "10.2.0");
    assert_eq!(after.status.stage_status, Some(StageStatus::Success));
}

#[tokio::test]
async fn test_vanished_instance_is_a_noop() {
    let cluster = Arc::new(InMemoryCluster::new());
    let controller = controller_over(&cluster, Arc::new(StaticProbe("10.2.0")));

    let action = controller
        .reconcile(&RunContext::new(), "monitoring", "gone")
        .await
        .unwrap();

    assert_eq!(action, Action::Done);
    assert_eq!(controller.metrics().reconciles("monitoring", "gone"), 1);
}
