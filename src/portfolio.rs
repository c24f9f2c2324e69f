//! Portfolio scoring and selection
//!
//! Ranks candidate hypotheses and greedily picks a bounded set that can run
//! concurrently without touching the same files.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ensure_finite, ensure_range, ValidationError};

const WEIGHT_IMPACT: f64 = 0.35;
const WEIGHT_RISK: f64 = 0.25;
const WEIGHT_EFFORT: f64 = 0.20;
const WEIGHT_REVERSIBLE: f64 = 0.20;

/// Added to effort hours before the log so zero-effort candidates stay finite
const EFFORT_SMOOTHING: f64 = 2.0;
const IRREVERSIBLE_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn multiplier(&self) -> f64 {
        match self {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 0.8,
            RiskLevel::High => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub expected_delta: f64,
    /// 0.0 - 1.0
    pub confidence: f64,
}

/// A hypothesis that could become an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub prediction: Prediction,
    pub risk_level: RiskLevel,
    pub effort_hours: f64,
    pub reversible: bool,
    #[serde(default)]
    pub affected_files: Vec<String>,
}

impl Candidate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::Blank {
                field: "candidate.id",
            });
        }
        ensure_finite("prediction.expected_delta", self.prediction.expected_delta)?;
        ensure_range("prediction.confidence", self.prediction.confidence, 0.0, 1.0)?;
        ensure_range("effort_hours", self.effort_hours, 0.0, f64::MAX)?;
        Ok(())
    }

    fn conflicts_with(&self, taken: &HashSet<&str>) -> bool {
        self.affected_files
            .iter()
            .any(|f| taken.contains(f.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub score: f64,
}

/// Weighted blend of predicted impact, risk, effort and reversibility.
pub fn score_candidate(candidate: &Candidate) -> Result<ScoredCandidate, ValidationError> {
    candidate.validate()?;

    let impact = candidate.prediction.expected_delta.abs() * candidate.prediction.confidence;
    let effort = 1.0 / (candidate.effort_hours + EFFORT_SMOOTHING).ln();
    let reversibility = if candidate.reversible {
        1.0
    } else {
        IRREVERSIBLE_FACTOR
    };

    let score = WEIGHT_IMPACT * impact
        + WEIGHT_RISK * candidate.risk_level.multiplier()
        + WEIGHT_EFFORT * effort
        + WEIGHT_REVERSIBLE * reversibility;

    Ok(ScoredCandidate {
        candidate: candidate.clone(),
        score,
    })
}

/// Score every candidate, rejecting the batch on the first invalid one.
pub fn score_all(candidates: &[Candidate]) -> Result<Vec<ScoredCandidate>, ValidationError> {
    candidates.iter().map(score_candidate).collect()
}

/// Pick up to `max_concurrent` candidates, best first, with pairwise disjoint
/// `affected_files`. Equal scores keep input order. A candidate dropped for a
/// conflict is not revisited.
pub fn select_portfolio(scored: &[ScoredCandidate], max_concurrent: usize) -> Vec<ScoredCandidate> {
    let mut ranked: Vec<&ScoredCandidate> = scored.iter().collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut selected: Vec<ScoredCandidate> = Vec::with_capacity(max_concurrent.min(scored.len()));
    let mut taken: HashSet<&str> = HashSet::new();

    for entry in ranked {
        if selected.len() >= max_concurrent {
            break;
        }
        if entry.candidate.conflicts_with(&taken) {
            debug!(candidate = %entry.candidate.id, "skipped: file conflict");
            continue;
        }
        taken.extend(entry.candidate.affected_files.iter().map(String::as_str));
        selected.push(entry.clone());
    }

    selected
}
