//! Auto Kill-Switch
//!
//! Decides whether a running experiment must be halted now, independent of
//! any pending approval gate. Order of evaluation:
//!
//! 1. Primary signal: a kill-threshold breach fires immediately and skips guards.
//! 2. Guard constraints, in the order supplied, over the trailing 24 hours.
//!    A guard whose fetch fails is skipped; fetch failures never kill.
//!    The first guard out of bounds fires and stops evaluation.
//!
//! The switch holds no state. Calling `check` again with the same stale
//! inputs fires again; callers must not re-kill an experiment they already
//! killed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::models::{ConstraintCheck, Measurement, MeasurementPlan, TargetDirection, ViolatedBound};
use crate::signals::{ConnectorConfig, SignalMonitor};
use crate::stats::SignificanceResult;
use crate::telemetry::ControlPlaneMetrics;

/// Side effect executed when the switch fires (e.g. flip the flag off)
#[async_trait::async_trait]
pub trait KillAction: Send + Sync {
    async fn kill(&self, experiment_id: &str, reason: &str) -> anyhow::Result<()>;
}

/// Kill action that only logs; for dry runs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogKillAction;

#[async_trait::async_trait]
impl KillAction for LogKillAction {
    async fn kill(&self, experiment_id: &str, reason: &str) -> anyhow::Result<()> {
        info!(experiment_id, reason, "dry run: kill action not executed");
        Ok(())
    }
}

/// What the switch watches for one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    pub experiment_id: String,
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub guards: Vec<ConstraintCheck>,
}

/// Which signal fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KillTrigger {
    PrimarySignal {
        delta: f64,
        kill_threshold: f64,
    },
    Guard {
        constraint: String,
        metric: String,
        value: f64,
        bound: ViolatedBound,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchResult {
    pub should_kill: bool,
    /// Audit-ready explanation when `should_kill` is set
    pub reason: Option<String>,
    pub trigger: Option<KillTrigger>,
    pub significance: SignificanceResult,
    /// Guards skipped because their fetch failed
    #[serde(default)]
    pub skipped_guards: Vec<String>,
}

pub struct AutoKillSwitch {
    monitor: Arc<SignalMonitor>,
    action: Arc<dyn KillAction>,
    metrics: Arc<ControlPlaneMetrics>,
}

impl AutoKillSwitch {
    pub fn new(monitor: Arc<SignalMonitor>, action: Arc<dyn KillAction>) -> Self {
        Self {
            monitor,
            action,
            metrics: Arc::new(ControlPlaneMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ControlPlaneMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn check(
        &self,
        config: &KillSwitchConfig,
        measurements: &[Measurement],
        plan: &MeasurementPlan,
    ) -> KillSwitchResult {
        let significance = self.monitor.evaluate(measurements, plan);

        if significance.exceeds_kill_threshold {
            let delta = significance.estimated_delta.unwrap_or_default();
            let reason = primary_reason(delta, plan);
            ControlPlaneMetrics::incr(&self.metrics.kills_primary);
            self.fire(&config.experiment_id, &reason).await;
            return KillSwitchResult {
                should_kill: true,
                reason: Some(reason),
                trigger: Some(KillTrigger::PrimarySignal {
                    delta,
                    kill_threshold: plan.kill_threshold,
                }),
                significance,
                skipped_guards: Vec::new(),
            };
        }

        let mut skipped_guards = Vec::new();
        if config.guards.is_empty() {
            return KillSwitchResult {
                should_kill: false,
                reason: None,
                trigger: None,
                significance,
                skipped_guards,
            };
        }

        let connector = match self.monitor.registry().resolve(&config.connector) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    experiment_id = %config.experiment_id,
                    error = %e,
                    "guard checks paused: no connector"
                );
                for guard in &config.guards {
                    ControlPlaneMetrics::incr(&self.metrics.guard_fetch_failures);
                    skipped_guards.push(guard.name.clone());
                }
                return KillSwitchResult {
                    should_kill: false,
                    reason: None,
                    trigger: None,
                    significance,
                    skipped_guards,
                };
            }
        };

        let window = self.monitor.config().guard_window();
        for guard in &config.guards {
            let reading = match self
                .monitor
                .fetch_over(
                    connector.as_ref(),
                    &config.connector,
                    &guard.metric,
                    guard.segment.as_deref(),
                    window,
                )
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    ControlPlaneMetrics::incr(&self.metrics.guard_fetch_failures);
                    warn!(
                        experiment_id = %config.experiment_id,
                        guard = %guard.name,
                        error = %e,
                        "guard fetch failed, skipping"
                    );
                    skipped_guards.push(guard.name.clone());
                    continue;
                }
            };

            if let Some(bound) = guard.violation(reading.value) {
                let reason = guard.describe_violation(reading.value, bound);
                ControlPlaneMetrics::incr(&self.metrics.kills_guard);
                self.fire(&config.experiment_id, &reason).await;
                return KillSwitchResult {
                    should_kill: true,
                    reason: Some(reason),
                    trigger: Some(KillTrigger::Guard {
                        constraint: guard.name.clone(),
                        metric: guard.metric.clone(),
                        value: reading.value,
                        bound,
                    }),
                    significance,
                    skipped_guards,
                };
            }
            debug!(guard = %guard.name, value = reading.value, "guard within bounds");
        }

        KillSwitchResult {
            should_kill: false,
            reason: None,
            trigger: None,
            significance,
            skipped_guards,
        }
    }

    async fn fire(&self, experiment_id: &str, reason: &str) {
        error!(experiment_id, reason, "🛑 Kill-switch engaged");
        if let Err(e) = self.action.kill(experiment_id, reason).await {
            ControlPlaneMetrics::incr(&self.metrics.kill_action_failures);
            error!(experiment_id, error = %e, "kill action failed");
        }
    }
}

fn primary_reason(delta: f64, plan: &MeasurementPlan) -> String {
    let bound = plan.kill_threshold.abs();
    match plan.direction {
        TargetDirection::Increase => format!(
            "primary signal breached kill threshold: delta {:.4} <= -{:.4}",
            delta, bound
        ),
        TargetDirection::Decrease => format!(
            "primary signal breached kill threshold: delta {:.4} >= {:.4}",
            delta, bound
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::models::Variant;
    use crate::signals::{ConnectorRegistry, SnapshotConnector, SnapshotData};
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingKill {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl KillAction for RecordingKill {
        async fn kill(&self, experiment_id: &str, reason: &str) -> anyhow::Result<()> {
            self.calls
                .lock()
                .push((experiment_id.to_string(), reason.to_string()));
            Ok(())
        }
    }

    struct FailingKill;

    #[async_trait::async_trait]
    impl KillAction for FailingKill {
        async fn kill(&self, _experiment_id: &str, _reason: &str) -> anyhow::Result<()> {
            anyhow::bail!("flag service unreachable")
        }
    }

    fn measurements(control: f64, treatment: f64, n: usize) -> Vec<Measurement> {
        let now = Utc::now();
        let mut all = Vec::new();
        for _ in 0..n {
            all.push(Measurement::new(Variant::Control, control, now));
            all.push(Measurement::new(Variant::Treatment, treatment, now));
        }
        all
    }

    fn setup(
        action: Arc<dyn KillAction>,
    ) -> (Arc<SnapshotConnector>, AutoKillSwitch, KillSwitchConfig) {
        let connector = Arc::new(SnapshotConnector::new(SnapshotData::default()));
        let registry = Arc::new(ConnectorRegistry::new().with(connector.clone()));
        let monitor = Arc::new(SignalMonitor::new(registry, MonitorConfig::default()));
        let config = KillSwitchConfig {
            experiment_id: "exp-1".into(),
            connector: ConnectorConfig::new("snapshot"),
            guards: vec![
                ConstraintCheck::new("latency", "latency_p95").with_max(300.0),
                ConstraintCheck::new("errors", "error_rate").with_max(0.02),
            ],
        };
        (connector, AutoKillSwitch::new(monitor, action), config)
    }

    #[tokio::test]
    async fn test_primary_breach_short_circuits_guards() {
        let recorder = Arc::new(RecordingKill::default());
        let (connector, switch, config) = setup(recorder.clone());
        let plan = MeasurementPlan::new(5, 0.95, 0.1, 0.5);

        let result = switch
            .check(&config, &measurements(10.0, 9.0, 5), &plan)
            .await;

        assert!(result.should_kill);
        assert!(matches!(
            result.trigger,
            Some(KillTrigger::PrimarySignal { .. })
        ));
        assert!(result
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("primary signal"));
        assert!(connector.fetches().is_empty());
        assert_eq!(recorder.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_exact_threshold_kills_and_inside_does_not() {
        let recorder = Arc::new(RecordingKill::default());
        let (connector, switch, mut config) = setup(recorder.clone());
        config.guards.clear();
        connector.set_metric("latency_p95", 1.0);
        let plan = MeasurementPlan::new(3, 0.95, 0.1, 0.5);

        let inside = switch
            .check(&config, &measurements(10.0, 9.75, 3), &plan)
            .await;
        assert!(!inside.should_kill);

        let at_bound = switch
            .check(&config, &measurements(10.0, 9.5, 3), &plan)
            .await;
        assert!(at_bound.should_kill);
        assert_eq!(recorder.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_first_violating_guard_fires_and_stops() {
        let recorder = Arc::new(RecordingKill::default());
        let (connector, switch, mut config) = setup(recorder.clone());
        config
            .guards
            .push(ConstraintCheck::new("crashes", "crash_rate").with_max(0.0));
        connector.set_metric("latency_p95", 450.0);
        connector.set_metric("error_rate", 0.5);
        connector.set_metric("crash_rate", 1.0);
        let plan = MeasurementPlan::new(3, 0.95, 0.1, 0.5);

        let result = switch
            .check(&config, &measurements(10.0, 10.0, 3), &plan)
            .await;

        assert!(result.should_kill);
        match result.trigger {
            Some(KillTrigger::Guard { constraint, .. }) => assert_eq!(constraint, "latency"),
            other => panic!("unexpected trigger {:?}", other),
        }
        let fetches = connector.fetches();
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].range.duration(), Duration::hours(24));
    }

    #[tokio::test]
    async fn test_guard_fetch_failure_is_skipped_not_fatal() {
        let recorder = Arc::new(RecordingKill::default());
        let (connector, switch, config) = setup(recorder.clone());
        connector.fail_metric("latency_p95");
        connector.set_metric("error_rate", 0.01);
        let plan = MeasurementPlan::new(3, 0.95, 0.1, 0.5);

        let result = switch
            .check(&config, &measurements(10.0, 10.0, 3), &plan)
            .await;

        assert!(!result.should_kill);
        assert_eq!(result.skipped_guards, vec!["latency".to_string()]);
        assert!(recorder.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_check_keeps_firing_on_stale_input() {
        let recorder = Arc::new(RecordingKill::default());
        let (_connector, switch, config) = setup(recorder.clone());
        let plan = MeasurementPlan::new(3, 0.95, 0.1, 0.5);
        let data = measurements(10.0, 8.0, 3);

        assert!(switch.check(&config, &data, &plan).await.should_kill);
        assert!(switch.check(&config, &data, &plan).await.should_kill);
    }

    #[tokio::test]
    async fn test_failing_action_still_reports_kill() {
        let (_connector, switch, config) = setup(Arc::new(FailingKill));
        let metrics = Arc::new(ControlPlaneMetrics::new());
        let switch = switch.with_metrics(metrics.clone());
        let plan = MeasurementPlan::new(3, 0.95, 0.1, 0.5);

        let result = switch
            .check(&config, &measurements(10.0, 8.0, 3), &plan)
            .await;
        assert!(result.should_kill);
        assert_eq!(ControlPlaneMetrics::get(&metrics.kill_action_failures), 1);
        assert_eq!(ControlPlaneMetrics::get(&metrics.kills_primary), 1);
    }
}
