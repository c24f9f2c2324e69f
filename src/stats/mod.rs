//! Statistics Engine
//!
//! Pure functions only: no I/O, no state between calls.

pub mod interval;
pub mod sequential;

pub use interval::{
    confidence_interval, pooled_standard_error, relative_lift, z_score, IntervalEstimate,
    SampleSummary,
};
pub use sequential::{
    decision_threshold, evaluate_significance, log_mixture_likelihood_ratio, DeltaInterval,
    SequentialTest, SignificanceReason, SignificanceResult, DEFAULT_MAX_TEST_STATISTIC,
    DEFAULT_MIXING_VARIANCE, MIN_SEQUENTIAL_SAMPLE,
};
