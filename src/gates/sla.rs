//! SLA arithmetic for approval gates
//!
//! Pure: given a gate, the current time and the policy, say what should
//! happen. The manager applies the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::Gate;
use crate::clock::hours_between;
use crate::config::SlaPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaAssessment {
    pub hours_elapsed: f64,
    pub percent_used: f64,
    pub should_remind: bool,
    pub should_escalate: bool,
    /// Who an escalation would go to; `None` means the chain is exhausted
    pub next_assignee: Option<String>,
}

pub fn evaluate_sla(gate: &Gate, now: DateTime<Utc>, policy: &SlaPolicy) -> SlaAssessment {
    let started = gate.sla_started_at(policy.restart_clock_on_delegation);
    let hours_elapsed = hours_between(started, now).max(0.0);
    let percent_used = if gate.sla_hours > 0.0 {
        hours_elapsed / gate.sla_hours * 100.0
    } else {
        f64::INFINITY
    };

    let should_escalate = hours_elapsed >= gate.sla_hours;
    let should_remind = gate.status.is_open()
        && !should_escalate
        && gate.reminder_sent_at.is_none()
        && percent_used >= policy.remind_at_percent;

    SlaAssessment {
        hours_elapsed,
        percent_used,
        should_remind,
        should_escalate: gate.status.is_open() && should_escalate,
        next_assignee: gate.next_assignee().map(str::to_string),
    }
}
