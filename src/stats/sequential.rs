//! Always-valid sequential significance test
//!
//! Mixture sequential probability ratio test (mSPRT) on the difference in
//! means between treatment and control. With a normal mixing prior
//! `N(0, tau^2)` over the true effect and `V` the variance of the observed
//! delta, the mixture likelihood ratio against "no effect" is
//!
//! ```text
//!   Lambda = sqrt(V / (V + tau^2)) * exp(tau^2 * delta^2 / (2 V (V + tau^2)))
//! ```
//!
//! `Lambda` is a nonnegative martingale under the null, so rejecting once
//! `Lambda >= 1 / alpha` keeps the false-positive rate below `alpha` no
//! matter how often the test is looked at.
//!
//! The guarantee assumes the variance of the delta is known. It is estimated
//! from the sample instead, and that estimate is too noisy at small counts to
//! keep the bound under continuous peeking, so no verdict is given before
//! [`MIN_SEQUENTIAL_SAMPLE`] observations per arm whatever the plan asks for.
//! Arms with zero variance carry no verdict either.
//!
//! The statistic is evaluated in log space and capped so degenerate input
//! never yields NaN or infinity.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::interval::{pooled_standard_error, z_score, SampleSummary};
use crate::models::{Measurement, MeasurementPlan, Variant};

/// Default mixing variance used when the plan does not specify one.
pub const DEFAULT_MIXING_VARIANCE: f64 = 1.0;
/// Upper bound on the reported statistic.
pub const DEFAULT_MAX_TEST_STATISTIC: f64 = 1e12;
/// Per-arm count below which the statistic is reported but never significant.
pub const MIN_SEQUENTIAL_SAMPLE: usize = 20;

/// Why a result carries no verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceReason {
    /// Too few observations, or no variation to estimate the noise from
    InsufficientSample,
}

impl SignificanceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignificanceReason::InsufficientSample => "insufficient_sample",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Verdict of one evaluation. Always recomputable from measurements + plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub significant: bool,
    pub test_statistic: Option<f64>,
    pub estimated_delta: Option<f64>,
    pub confidence_interval: Option<DeltaInterval>,
    pub sample_size_control: usize,
    pub sample_size_treatment: usize,
    pub meets_success_threshold: bool,
    /// Primary signal crossed the kill boundary. Independent of `significant`.
    pub exceeds_kill_threshold: bool,
    pub reason: Option<SignificanceReason>,
}

impl SignificanceResult {
    fn insufficient(n_control: usize, n_treatment: usize) -> Self {
        Self {
            significant: false,
            test_statistic: None,
            estimated_delta: None,
            confidence_interval: None,
            sample_size_control: n_control,
            sample_size_treatment: n_treatment,
            meets_success_threshold: false,
            exceeds_kill_threshold: false,
            reason: Some(SignificanceReason::InsufficientSample),
        }
    }
}

/// Accept threshold `1 / (1 - confidence_required)`.
///
/// Strictly increasing in `confidence_required`; the argument is clamped into
/// the open unit interval so the threshold stays finite.
pub fn decision_threshold(confidence_required: f64) -> f64 {
    let c = if confidence_required.is_finite() {
        confidence_required.clamp(0.0, 1.0 - 1e-12)
    } else {
        0.95
    };
    1.0 / (1.0 - c)
}

/// Natural log of the mixture likelihood ratio.
///
/// `variance` is the variance of the observed delta. Returns `None` when
/// `variance` is zero, where the ratio is degenerate.
pub fn log_mixture_likelihood_ratio(delta: f64, variance: f64, tau_squared: f64) -> Option<f64> {
    if variance.is_nan() || variance <= 0.0 || tau_squared.is_nan() || tau_squared <= 0.0 {
        return None;
    }
    let total = variance + tau_squared;
    let log_ratio = 0.5 * (variance / total).ln()
        + (tau_squared * delta * delta) / (2.0 * variance * total);
    if log_ratio.is_nan() {
        None
    } else {
        Some(log_ratio)
    }
}

/// Tunables for the sequential test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequentialTest {
    /// Mixing variance used when the plan omits one
    pub mixing_variance: f64,
    /// Reported statistic is capped here
    pub max_test_statistic: f64,
}

impl Default for SequentialTest {
    fn default() -> Self {
        Self {
            mixing_variance: DEFAULT_MIXING_VARIANCE,
            max_test_statistic: DEFAULT_MAX_TEST_STATISTIC,
        }
    }
}

impl SequentialTest {
    pub fn new(mixing_variance: f64, max_test_statistic: f64) -> Self {
        Self {
            mixing_variance,
            max_test_statistic,
        }
    }

    /// Evaluate the experiment's measurements against its plan.
    ///
    /// Pure: never fails and never returns non-finite numbers.
    pub fn evaluate(
        &self,
        measurements: &[Measurement],
        plan: &MeasurementPlan,
    ) -> SignificanceResult {
        let (control, treatment): (Vec<f64>, Vec<f64>) = partition(measurements);
        let n_control = control.len();
        let n_treatment = treatment.len();

        let required = plan.min_sample_size.max(1);
        if n_control < required || n_treatment < required {
            debug!(
                n_control,
                n_treatment,
                min_sample_size = plan.min_sample_size,
                "insufficient sample for significance test"
            );
            return SignificanceResult::insufficient(n_control, n_treatment);
        }

        let c = SampleSummary::from_values(&control);
        let t = SampleSummary::from_values(&treatment);
        let se = pooled_standard_error(&c, &t);
        let delta = t.mean - c.mean;

        let tau_sq = plan
            .mixing_variance
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(self.mixing_variance);
        let cap = self.max_test_statistic.max(1.0);
        let threshold = decision_threshold(plan.confidence_required);

        let burned_in =
            n_control >= MIN_SEQUENTIAL_SAMPLE && n_treatment >= MIN_SEQUENTIAL_SAMPLE;
        // Zero variance: the delta is still known, the noise around it is not
        let statistic = log_mixture_likelihood_ratio(delta, se * se, tau_sq)
            .map(|log_ratio| log_ratio.min(cap.ln()).exp());
        let significant = burned_in && statistic.is_some_and(|s| s >= threshold);
        let reason = if burned_in && statistic.is_some() {
            None
        } else {
            debug!(
                n_control,
                n_treatment,
                standard_error = se,
                "sample too small or too flat for a verdict"
            );
            Some(SignificanceReason::InsufficientSample)
        };

        let half_width = z_score(plan.confidence_required) * se;

        SignificanceResult {
            significant,
            test_statistic: statistic,
            estimated_delta: Some(delta),
            confidence_interval: Some(DeltaInterval {
                lower: delta - half_width,
                upper: delta + half_width,
            }),
            sample_size_control: n_control,
            sample_size_treatment: n_treatment,
            meets_success_threshold: plan.direction.meets_success(delta, plan.success_threshold),
            exceeds_kill_threshold: plan.direction.is_harmful(delta, plan.kill_threshold),
            reason,
        }
    }
}

/// Evaluate with the default mixing variance and cap.
pub fn evaluate_significance(
    measurements: &[Measurement],
    plan: &MeasurementPlan,
) -> SignificanceResult {
    SequentialTest::default().evaluate(measurements, plan)
}

fn partition(measurements: &[Measurement]) -> (Vec<f64>, Vec<f64>) {
    let mut control = Vec::with_capacity(measurements.len() / 2 + 1);
    let mut treatment = Vec::with_capacity(measurements.len() / 2 + 1);
    for m in measurements {
        match m.variant {
            Variant::Control => control.push(m.value),
            Variant::Treatment => treatment.push(m.value),
        }
    }
    (control, treatment)
}
