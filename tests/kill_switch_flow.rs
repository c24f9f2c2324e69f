//! Kill-switch driven end to end through the signal monitor
//!
//! Exercises the scheduler loop the way an orchestrator runs it: pull both
//! arms from a connector each tick, accumulate measurements, ask the switch.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use experiment_control::config::MonitorConfig;
use experiment_control::kill_switch::{AutoKillSwitch, KillAction, KillSwitchConfig, KillTrigger};
use experiment_control::models::{
    ConstraintCheck, MeasurementPlan, MetricDescriptor, MetricValue, TimeRange, VariantMetricValue,
};
use experiment_control::signals::{
    ConnectionStatus, ConnectorConfig, ConnectorError, ConnectorRegistry, SignalConnector,
    SignalMonitor, SnapshotConnector, SnapshotData,
};
use experiment_control::telemetry::ControlPlaneMetrics;

/// Vendor adapter whose API is down
struct OutageConnector;

#[async_trait::async_trait]
impl SignalConnector for OutageConnector {
    fn provider(&self) -> &str {
        "outage"
    }

    async fn test_connection(&self, _config: &ConnectorConfig) -> ConnectionStatus {
        ConnectionStatus {
            success: false,
            message: "503 from upstream".into(),
        }
    }

    async fn fetch_metric(
        &self,
        _metric: &str,
        _range: TimeRange,
        _segment: Option<&str>,
        _config: &ConnectorConfig,
    ) -> Result<MetricValue, ConnectorError> {
        Err(ConnectorError::Unavailable("503 from upstream".into()))
    }

    async fn fetch_variant_metric(
        &self,
        _metric: &str,
        _variant_key: &str,
        _range: TimeRange,
        _config: &ConnectorConfig,
    ) -> Result<VariantMetricValue, ConnectorError> {
        Err(ConnectorError::Unavailable("503 from upstream".into()))
    }

    async fn list_metrics(
        &self,
        _config: &ConnectorConfig,
    ) -> Result<Vec<MetricDescriptor>, ConnectorError> {
        Ok(vec![])
    }
}

#[derive(Default)]
struct FlagService {
    killed: Mutex<Vec<(String, String)>>,
}

#[async_trait::async_trait]
impl KillAction for FlagService {
    async fn kill(&self, experiment_id: &str, reason: &str) -> anyhow::Result<()> {
        self.killed
            .lock()
            .push((experiment_id.to_string(), reason.to_string()));
        Ok(())
    }
}

fn guards() -> Vec<ConstraintCheck> {
    vec![
        ConstraintCheck::new("p95 latency", "latency_p95").with_max(800.0),
        ConstraintCheck::new("error rate", "error_rate").with_max(0.01),
    ]
}

#[tokio::test]
async fn outage_never_kills_a_healthy_experiment() {
    let registry = Arc::new(
        ConnectorRegistry::new()
            .with(Arc::new(OutageConnector))
            .with(Arc::new(SnapshotConnector::new(SnapshotData::default()))),
    );
    let metrics = Arc::new(ControlPlaneMetrics::new());
    let monitor = Arc::new(
        SignalMonitor::new(registry, MonitorConfig::default()).with_metrics(metrics.clone()),
    );
    let flags = Arc::new(FlagService::default());
    let switch = AutoKillSwitch::new(monitor.clone(), flags.clone()).with_metrics(metrics.clone());

    let config = KillSwitchConfig {
        experiment_id: "exp-outage".into(),
        connector: ConnectorConfig::new("outage"),
        guards: guards(),
    };
    let plan = MeasurementPlan::new(5, 0.95, 0.02, 0.05);

    let result = switch.check(&config, &[], &plan).await;
    assert!(!result.should_kill);
    assert_eq!(result.skipped_guards, vec!["p95 latency", "error rate"]);
    assert_eq!(ControlPlaneMetrics::get(&metrics.guard_fetch_failures), 2);
    assert!(flags.killed.lock().is_empty());

    let constraints = monitor
        .check_constraints(&config.connector, &config.guards)
        .await;
    assert!(constraints.iter().all(|c| !c.violated && c.fetch_error.is_some()));

    assert!(monitor
        .fetch_variant_measurements(&config.connector, "conversion", "exp-outage")
        .await
        .is_err());
}

#[tokio::test]
async fn harmful_treatment_is_killed_once_sample_suffices() {
    let snapshot = Arc::new(SnapshotConnector::new(SnapshotData::default()));
    snapshot.set_variant_metric("conversion", 0.10, 0.02);
    snapshot.set_metric("latency_p95", 300.0);
    snapshot.set_metric("error_rate", 0.001);

    let registry = Arc::new(ConnectorRegistry::new().with(snapshot.clone()));
    let monitor = Arc::new(SignalMonitor::new(registry, MonitorConfig::default()));
    let flags = Arc::new(FlagService::default());
    let switch = AutoKillSwitch::new(monitor.clone(), flags.clone());

    let config = KillSwitchConfig {
        experiment_id: "exp-checkout".into(),
        connector: ConnectorConfig::new("snapshot"),
        guards: guards(),
    };
    let plan = MeasurementPlan::new(3, 0.95, 0.02, 0.05);

    let mut measurements = Vec::new();
    let mut fired_at = None;
    for tick in 1..=5 {
        let pair = monitor
            .fetch_variant_measurements(&config.connector, "conversion", &config.experiment_id)
            .await
            .expect("snapshot serves both arms");
        measurements.extend(pair);

        let result = switch.check(&config, &measurements, &plan).await;
        if result.should_kill {
            assert!(matches!(
                result.trigger,
                Some(KillTrigger::PrimarySignal { .. })
            ));
            fired_at = Some(tick);
            break;
        }
        assert_eq!(
            result.significance.reason.map(|r| r.as_str()),
            Some("insufficient_sample")
        );
    }

    assert_eq!(fired_at, Some(3));
    let killed = flags.killed.lock();
    assert_eq!(killed.len(), 1);
    assert_eq!(killed[0].0, "exp-checkout");
    assert!(killed[0].1.contains("kill threshold"));
}

#[tokio::test]
async fn guard_breach_kills_healthy_primary() {
    let snapshot = Arc::new(SnapshotConnector::new(SnapshotData::default()));
    snapshot.set_metric("latency_p95", 300.0);
    snapshot.set_metric("error_rate", 0.2);
    let registry = Arc::new(ConnectorRegistry::new().with(snapshot.clone()));
    let monitor = Arc::new(SignalMonitor::new(registry, MonitorConfig::default()));
    let flags = Arc::new(FlagService::default());
    let switch = AutoKillSwitch::new(monitor, flags.clone());

    let config = KillSwitchConfig {
        experiment_id: "exp-search".into(),
        connector: ConnectorConfig::new("snapshot"),
        guards: guards(),
    };
    let result = switch
        .check(&config, &[], &MeasurementPlan::new(10, 0.95, 0.02, 0.05))
        .await;

    assert!(result.should_kill);
    match result.trigger {
        Some(KillTrigger::Guard {
            constraint, value, ..
        }) => {
            assert_eq!(constraint, "error rate");
            assert_eq!(value, 0.2);
        }
        other => panic!("expected guard trigger, got {:?}", other),
    }
    assert!(result.reason.is_some());
    assert_eq!(snapshot.fetches().len(), 2);
}

#[tokio::test]
async fn stuck_connector_is_bounded_by_timeout() {
    let slow = Arc::new(
        SnapshotConnector::new(SnapshotData::default()).with_delay(Duration::from_secs(5)),
    );
    slow.set_metric("latency_p95", 10_000.0);
    let registry = Arc::new(ConnectorRegistry::new().with(slow));
    let monitor = Arc::new(SignalMonitor::new(registry, MonitorConfig::default()));
    let flags = Arc::new(FlagService::default());
    let switch = AutoKillSwitch::new(monitor, flags.clone());

    let config = KillSwitchConfig {
        experiment_id: "exp-slow".into(),
        connector: ConnectorConfig::new("snapshot").with_timeout(Duration::from_millis(20)),
        guards: vec![ConstraintCheck::new("p95 latency", "latency_p95").with_max(800.0)],
    };

    let started = std::time::Instant::now();
    let result = switch
        .check(&config, &[], &MeasurementPlan::new(10, 0.95, 0.02, 0.05))
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!result.should_kill);
    assert_eq!(result.skipped_guards, vec!["p95 latency"]);
}
