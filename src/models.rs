use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, ensure_open_range, ensure_range, ValidationError};

/// Experiment arm a measurement was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Control,
    Treatment,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Control => "control",
            Variant::Treatment => "treatment",
        }
    }
}

/// One observation of the primary signal for one arm.
///
/// Immutable once produced; the monitor appends these to a per-experiment
/// sequence and never relabels an existing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub variant: Variant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    pub fn new(variant: Variant, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            variant,
            sample_size: None,
            timestamp,
        }
    }

    pub fn with_sample_size(mut self, sample_size: u64) -> Self {
        self.sample_size = Some(sample_size);
        self
    }
}

/// Which way the primary signal is supposed to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDirection {
    /// Higher is better: harm is a negative delta
    #[default]
    Increase,
    /// Lower is better: harm is a positive delta
    Decrease,
}

impl TargetDirection {
    /// Whether `delta` is at or beyond the harmful kill boundary.
    ///
    /// For `Increase` this is `delta <= -|kill_threshold|`; the boundary value
    /// itself counts as harmful, even though some write-ups of this rule treat a
    /// delta of exactly `-kill_threshold` as safe.
    pub fn is_harmful(&self, delta: f64, kill_threshold: f64) -> bool {
        let bound = kill_threshold.abs();
        match self {
            TargetDirection::Increase => delta <= -bound,
            TargetDirection::Decrease => delta >= bound,
        }
    }

    pub fn meets_success(&self, delta: f64, success_threshold: f64) -> bool {
        match self {
            TargetDirection::Increase => delta >= success_threshold,
            TargetDirection::Decrease => delta <= success_threshold,
        }
    }
}

/// Decision parameters attached to an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPlan {
    /// Minimum observations per arm before any inference is attempted
    pub min_sample_size: usize,
    /// Required confidence, strictly inside (0, 1)
    pub confidence_required: f64,
    /// Signed delta the treatment must reach to count as a win
    pub success_threshold: f64,
    /// Delta magnitude beyond which the treatment is judged harmful
    pub kill_threshold: f64,
    #[serde(default)]
    pub direction: TargetDirection,
    /// Variance of the normal mixing prior over effect sizes (tau squared)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixing_variance: Option<f64>,
}

impl MeasurementPlan {
    pub fn new(
        min_sample_size: usize,
        confidence_required: f64,
        success_threshold: f64,
        kill_threshold: f64,
    ) -> Self {
        Self {
            min_sample_size,
            confidence_required,
            success_threshold,
            kill_threshold,
            direction: TargetDirection::Increase,
            mixing_variance: None,
        }
    }

    pub fn with_direction(mut self, direction: TargetDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_mixing_variance(mut self, tau_squared: f64) -> Self {
        self.mixing_variance = Some(tau_squared);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_open_range("confidence_required", self.confidence_required, 0.0, 1.0)?;
        ensure_finite("success_threshold", self.success_threshold)?;
        ensure_finite("kill_threshold", self.kill_threshold)?;
        if let Some(tau_sq) = self.mixing_variance {
            ensure_range("mixing_variance", tau_sq, f64::MIN_POSITIVE, f64::MAX)?;
        }
        Ok(())
    }
}

/// Half-open window `[start, end)` a connector aggregates over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Window of length `span` ending at `now`.
    pub fn trailing(now: DateTime<Utc>, span: Duration) -> Self {
        Self {
            start: now - span,
            end: now,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// A single metric reading returned by a connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Metric reading split by arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantMetricValue {
    pub control: MetricValue,
    pub treatment: MetricValue,
}

/// Entry in a connector's metric catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Which side of a guard bound was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolatedBound {
    Min,
    Max,
}

impl ViolatedBound {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolatedBound::Min => "min",
            ViolatedBound::Max => "max",
        }
    }
}

/// Named guard metric with optional bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintCheck {
    pub name: String,
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
}

impl ConstraintCheck {
    pub fn new(name: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            min: None,
            max: None,
            segment: None,
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Bound crossed by `value`, if any. Bounds are inclusive (on the bound is fine).
    pub fn violation(&self, value: f64) -> Option<ViolatedBound> {
        if let Some(min) = self.min {
            if value < min {
                return Some(ViolatedBound::Min);
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Some(ViolatedBound::Max);
            }
        }
        None
    }

    /// Human readable description of a breach for audit display.
    pub fn describe_violation(&self, value: f64, bound: ViolatedBound) -> String {
        match bound {
            ViolatedBound::Min => format!(
                "guard '{}' ({}) = {:.4} fell below min {:.4}",
                self.name,
                self.metric,
                value,
                self.min.unwrap_or_default()
            ),
            ViolatedBound::Max => format!(
                "guard '{}' ({}) = {:.4} exceeded max {:.4}",
                self.name,
                self.metric,
                value,
                self.max.unwrap_or_default()
            ),
        }
    }
}

/// Outcome of checking one constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintResult {
    pub name: String,
    pub metric: String,
    pub value: f64,
    pub violated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<ViolatedBound>,
    /// Set when the fetch failed and the result was degraded to non-violating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increase_kill_boundary_inclusive() {
        let dir = TargetDirection::Increase;
        assert!(dir.is_harmful(-0.5, 0.5));
        assert!(dir.is_harmful(-0.5, -0.5));
        assert!(!dir.is_harmful(-0.4999, 0.5));
        assert!(dir.is_harmful(-0.6, 0.5));
    }

    #[test]
    fn test_decrease_mirrors_thresholds() {
        let dir = TargetDirection::Decrease;
        assert!(dir.is_harmful(0.5, 0.5));
        assert!(!dir.is_harmful(-3.0, 0.5));
        assert!(dir.meets_success(-0.2, -0.1));
        assert!(!dir.meets_success(0.0, -0.1));
    }

    #[test]
    fn test_plan_validation() {
        assert!(MeasurementPlan::new(30, 0.95, 0.1, 0.2).validate().is_ok());
        assert!(MeasurementPlan::new(30, 1.0, 0.1, 0.2).validate().is_err());
        assert!(MeasurementPlan::new(30, 0.0, 0.1, 0.2).validate().is_err());
        assert!(MeasurementPlan::new(30, 0.9, f64::NAN, 0.2)
            .validate()
            .is_err());
        assert!(MeasurementPlan::new(30, 0.9, 0.1, 0.2)
            .with_mixing_variance(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_constraint_bounds() {
        let check = ConstraintCheck::new("errors", "error_rate")
            .with_min(0.0)
            .with_max(0.05);
        assert_eq!(check.violation(0.05), None);
        assert_eq!(check.violation(0.051), Some(ViolatedBound::Max));
        assert_eq!(check.violation(-0.1), Some(ViolatedBound::Min));
        assert!(check
            .describe_violation(0.2, ViolatedBound::Max)
            .contains("exceeded max"));
    }

    #[test]
    fn test_plan_deserializes_with_defaults() {
        let plan: MeasurementPlan = serde_json::from_str(
            r#"{
                "min_sample_size": 10,
                "confidence_required": 0.95,
                "success_threshold": 0.02,
                "kill_threshold": 0.05
            }"#,
        )
        .expect("plan json");
        assert_eq!(plan.direction, TargetDirection::Increase);
        assert!(plan.mixing_variance.is_none());
    }
}
