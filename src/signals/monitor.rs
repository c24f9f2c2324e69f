//! Signal Monitor
//!
//! Polls connectors for current metric values and evaluates guard bounds.
//! Every fetch is bounded by the connector config's timeout; nothing here
//! retries. A failed fetch degrades one result, never the batch.

use std::sync::Arc;

use chrono::Duration;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::connector::{ConnectorConfig, ConnectorError, ConnectorRegistry, SignalConnector};
use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::models::{
    ConstraintCheck, ConstraintResult, Measurement, MeasurementPlan, MetricValue, TimeRange,
    Variant,
};
use crate::stats::{SequentialTest, SignificanceResult};
use crate::telemetry::ControlPlaneMetrics;

pub struct SignalMonitor {
    registry: Arc<ConnectorRegistry>,
    config: MonitorConfig,
    test: SequentialTest,
    clock: Arc<dyn Clock>,
    metrics: Arc<ControlPlaneMetrics>,
}

impl SignalMonitor {
    pub fn new(registry: Arc<ConnectorRegistry>, config: MonitorConfig) -> Self {
        Self {
            registry,
            config,
            test: SequentialTest::default(),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(ControlPlaneMetrics::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ControlPlaneMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_sequential_test(mut self, test: SequentialTest) -> Self {
        self.test = test;
        self
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The connector's own timeout, capped by the control plane ceiling.
    pub fn effective_timeout(&self, config: &ConnectorConfig) -> std::time::Duration {
        config.timeout().min(self.config.max_fetch_timeout)
    }

    /// Fetch `metric` aggregated over the trailing `span`, bounded by
    /// [`Self::effective_timeout`].
    pub async fn fetch_over(
        &self,
        connector: &dyn SignalConnector,
        config: &ConnectorConfig,
        metric: &str,
        segment: Option<&str>,
        span: Duration,
    ) -> Result<MetricValue, ConnectorError> {
        let range = TimeRange::trailing(self.clock.now(), span);
        let timeout = self.effective_timeout(config);
        match tokio::time::timeout(timeout, connector.fetch_metric(metric, range, segment, config))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Timeout {
                metric: metric.to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Current value of `metric` over the trailing 7-day window.
    pub async fn fetch_current_value(
        &self,
        connector: &dyn SignalConnector,
        config: &ConnectorConfig,
        metric: &str,
        segment: Option<&str>,
    ) -> Result<MetricValue, ConnectorError> {
        self.fetch_over(
            connector,
            config,
            metric,
            segment,
            self.config.current_value_window(),
        )
        .await
    }

    /// Check every constraint against its latest value over the trailing hour.
    ///
    /// Fetches run concurrently. A failed fetch yields a non-violating,
    /// zero-valued result carrying the error text; siblings are unaffected.
    /// Results come back in input order.
    pub async fn check_constraints(
        &self,
        config: &ConnectorConfig,
        constraints: &[ConstraintCheck],
    ) -> Vec<ConstraintResult> {
        let connector = match self.registry.resolve(config) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    provider = %config.provider,
                    error = %e,
                    "constraint check without connector"
                );
                return constraints
                    .iter()
                    .map(|c| {
                        ControlPlaneMetrics::incr(&self.metrics.constraint_fetch_failures);
                        degraded(c, &e)
                    })
                    .collect();
            }
        };

        let window = self.config.constraint_window();
        let checks = constraints.iter().map(|constraint| {
            let connector = connector.clone();
            async move {
                let fetched = self
                    .fetch_over(
                        connector.as_ref(),
                        config,
                        &constraint.metric,
                        constraint.segment.as_deref(),
                        window,
                    )
                    .await;
                self.evaluate_constraint(constraint, fetched)
            }
        });

        join_all(checks).await
    }

    fn evaluate_constraint(
        &self,
        constraint: &ConstraintCheck,
        fetched: Result<MetricValue, ConnectorError>,
    ) -> ConstraintResult {
        ControlPlaneMetrics::incr(&self.metrics.constraint_checks);
        match fetched {
            Ok(reading) => {
                let bound = constraint.violation(reading.value);
                if let Some(b) = bound {
                    ControlPlaneMetrics::incr(&self.metrics.constraint_violations);
                    warn!(
                        constraint = %constraint.name,
                        metric = %constraint.metric,
                        value = reading.value,
                        bound = b.as_str(),
                        "constraint violated"
                    );
                } else {
                    debug!(constraint = %constraint.name, value = reading.value, "constraint ok");
                }
                ConstraintResult {
                    name: constraint.name.clone(),
                    metric: constraint.metric.clone(),
                    value: reading.value,
                    violated: bound.is_some(),
                    bound,
                    fetch_error: None,
                }
            }
            Err(e) => {
                ControlPlaneMetrics::incr(&self.metrics.constraint_fetch_failures);
                warn!(
                    constraint = %constraint.name,
                    metric = %constraint.metric,
                    error = %e,
                    "constraint fetch failed, reporting as not violated"
                );
                degraded(constraint, &e)
            }
        }
    }

    /// Read both arms of `metric` once and turn the reading into two measurements.
    ///
    /// Either both measurements are returned or neither is.
    pub async fn fetch_variant_measurements(
        &self,
        config: &ConnectorConfig,
        metric: &str,
        variant_key: &str,
    ) -> Result<[Measurement; 2], ConnectorError> {
        let connector = self.registry.resolve(config)?;
        let range = TimeRange::trailing(self.clock.now(), self.config.current_value_window());
        let timeout = self.effective_timeout(config);
        let reading = tokio::time::timeout(
            timeout,
            connector.fetch_variant_metric(metric, variant_key, range, config),
        )
        .await
        .map_err(|_| ConnectorError::Timeout {
            metric: metric.to_string(),
            after_ms: timeout.as_millis() as u64,
        })??;

        let to_measurement = |variant: Variant, value: &MetricValue| Measurement {
            value: value.value,
            variant,
            sample_size: value.sample_size,
            timestamp: value.timestamp,
        };
        Ok([
            to_measurement(Variant::Control, &reading.control),
            to_measurement(Variant::Treatment, &reading.treatment),
        ])
    }

    /// Run the sequential test over `measurements`.
    pub fn evaluate(
        &self,
        measurements: &[Measurement],
        plan: &MeasurementPlan,
    ) -> SignificanceResult {
        ControlPlaneMetrics::incr(&self.metrics.significance_evaluations);
        self.test.evaluate(measurements, plan)
    }
}

fn degraded(constraint: &ConstraintCheck, error: &ConnectorError) -> ConstraintResult {
    ConstraintResult {
        name: constraint.name.clone(),
        metric: constraint.metric.clone(),
        value: 0.0,
        violated: false,
        bound: None,
        fetch_error: Some(error.to_string()),
    }
}
