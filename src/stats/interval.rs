//! Fixed-horizon interval estimators
//!
//! Normal-approximation intervals on the additive delta and the relative
//! lift between two arms. These share the mean/variance primitives with the
//! sequential test but carry no anytime-validity guarantee: use them for
//! reporting, not for deciding.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;

use crate::error::{ensure_open_range, ValidationError};

/// Count, mean and unbiased variance of one arm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample variance with an n-1 divisor; 0 for fewer than two values
    pub variance: f64,
}

impl SampleSummary {
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        if count == 0 {
            return Self {
                count,
                mean: 0.0,
                variance: 0.0,
            };
        }
        let mean = values.iter().mean();
        let variance = if count < 2 {
            0.0
        } else {
            values.iter().variance()
        };
        Self {
            count,
            mean: if mean.is_finite() { mean } else { 0.0 },
            variance: if variance.is_finite() {
                variance.max(0.0)
            } else {
                0.0
            },
        }
    }

    /// Variance of the sample mean (`variance / count`), 0 for an empty arm.
    pub fn mean_variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.variance / self.count as f64
        }
    }
}

/// Standard error of `mean(treatment) - mean(control)`.
pub fn pooled_standard_error(control: &SampleSummary, treatment: &SampleSummary) -> f64 {
    let se = (control.mean_variance() + treatment.mean_variance()).sqrt();
    if se.is_finite() {
        se
    } else {
        0.0
    }
}

/// Two-sided critical value for `confidence_level`, e.g. 1.96 for 0.95.
///
/// The level is clamped into the open unit interval so the result is always finite.
pub fn z_score(confidence_level: f64) -> f64 {
    let level = if confidence_level.is_finite() {
        confidence_level.clamp(1e-9, 1.0 - 1e-9)
    } else {
        0.95
    };
    let p = (1.0 + level) / 2.0;
    match Normal::new(0.0, 1.0) {
        Ok(n) => n.inverse_cdf(p),
        Err(_) => 1.96,
    }
}

/// Point estimate with a symmetric interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalEstimate {
    pub point_estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
}

impl IntervalEstimate {
    fn symmetric(point: f64, half_width: f64, confidence_level: f64) -> Self {
        Self {
            point_estimate: point,
            lower: point - half_width,
            upper: point + half_width,
            confidence_level,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

fn check_inputs(
    control: &[f64],
    treatment: &[f64],
    confidence_level: f64,
) -> Result<(), ValidationError> {
    if control.is_empty() {
        return Err(ValidationError::EmptySample {
            field: "control_values",
        });
    }
    if treatment.is_empty() {
        return Err(ValidationError::EmptySample {
            field: "treatment_values",
        });
    }
    ensure_open_range("confidence_level", confidence_level, 0.0, 1.0)
}

/// Interval on the additive delta `mean(treatment) - mean(control)`.
pub fn confidence_interval(
    control: &[f64],
    treatment: &[f64],
    confidence_level: f64,
) -> Result<IntervalEstimate, ValidationError> {
    check_inputs(control, treatment, confidence_level)?;
    let c = SampleSummary::from_values(control);
    let t = SampleSummary::from_values(treatment);
    let delta = t.mean - c.mean;
    let se = pooled_standard_error(&c, &t);
    Ok(IntervalEstimate::symmetric(
        delta,
        z_score(confidence_level) * se,
        confidence_level,
    ))
}

/// Interval on the relative lift `delta / mean(control)` via the delta method.
///
/// Returns `Ok(None)` when the control mean is zero and the lift is undefined.
pub fn relative_lift(
    control: &[f64],
    treatment: &[f64],
    confidence_level: f64,
) -> Result<Option<IntervalEstimate>, ValidationError> {
    check_inputs(control, treatment, confidence_level)?;
    let c = SampleSummary::from_values(control);
    let t = SampleSummary::from_values(treatment);
    if c.mean == 0.0 {
        return Ok(None);
    }

    let lift = (t.mean - c.mean) / c.mean;
    // Var(T/C) ~= Var(T)/C^2 + T^2 Var(C)/C^4
    let c_sq = c.mean * c.mean;
    let var = t.mean_variance() / c_sq + (t.mean * t.mean) * c.mean_variance() / (c_sq * c_sq);
    let se = if var.is_finite() && var > 0.0 {
        var.sqrt()
    } else {
        0.0
    };

    Ok(Some(IntervalEstimate::symmetric(
        lift,
        z_score(confidence_level) * se,
        confidence_level,
    )))
}
