//! Approval gate records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    ApprovedWithConditions,
    /// Escalated to the next assignee; still awaiting a decision
    Delegated,
    TimedOut,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pending => "pending",
            GateStatus::Approved => "approved",
            GateStatus::Rejected => "rejected",
            GateStatus::ApprovedWithConditions => "approved_with_conditions",
            GateStatus::Delegated => "delegated",
            GateStatus::TimedOut => "timed_out",
        }
    }

    /// Awaiting a human: tracked by the SLA monitor and answerable.
    pub fn is_open(&self) -> bool {
        matches!(self, GateStatus::Pending | GateStatus::Delegated)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

/// Lifecycle checkpoint a gate guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Launch,
    Ship,
    Scale,
    Kill,
}

impl GateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateType::Launch => "launch",
            GateType::Ship => "ship",
            GateType::Scale => "scale",
            GateType::Kill => "kill",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: String,
    pub experiment_id: String,
    pub gate_type: GateType,
    pub question: String,
    pub assigned_to: String,
    #[serde(default)]
    pub escalation_chain: Vec<String>,
    pub sla_hours: f64,
    pub status: GateStatus,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notification_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_sent_at: Option<DateTime<Utc>>,
    /// Last escalation, if any
    #[serde(default)]
    pub delegated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response_note: Option<String>,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub experiment_title: String,
    #[serde(default)]
    pub outcome_title: String,
    /// Bumped by the store on every successful update
    #[serde(default)]
    pub version: u64,
}

impl Gate {
    pub fn new(id: String, input: CreateGateInput, now: DateTime<Utc>) -> Self {
        Self {
            id,
            experiment_id: input.experiment_id,
            gate_type: input.gate_type,
            question: input.question,
            assigned_to: input.assigned_to,
            escalation_chain: input.escalation_chain,
            sla_hours: input.sla_hours,
            status: GateStatus::Pending,
            conditions: Vec::new(),
            created_at: now,
            responded_at: None,
            notification_sent_at: None,
            reminder_sent_at: None,
            delegated_at: None,
            response_note: None,
            decided_by: None,
            experiment_title: input.experiment_title,
            outcome_title: input.outcome_title,
            version: 0,
        }
    }

    /// Instant the SLA clock runs from.
    pub fn sla_started_at(&self, restart_on_delegation: bool) -> DateTime<Utc> {
        match (restart_on_delegation, self.delegated_at) {
            (true, Some(at)) => at,
            _ => self.created_at,
        }
    }

    /// Next assignee strictly after the current one; the chain head if the
    /// current assignee is not in the chain. Measured from the last occurrence
    /// so a chain that repeats a name still runs out.
    pub fn next_assignee(&self) -> Option<&str> {
        let next = match self
            .escalation_chain
            .iter()
            .rposition(|name| name == &self.assigned_to)
        {
            Some(idx) => self.escalation_chain.get(idx + 1),
            None => self.escalation_chain.first(),
        };
        next.map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGateInput {
    pub experiment_id: String,
    pub gate_type: GateType,
    pub question: String,
    pub assigned_to: String,
    #[serde(default)]
    pub escalation_chain: Vec<String>,
    pub sla_hours: f64,
    #[serde(default)]
    pub experiment_title: String,
    #[serde(default)]
    pub outcome_title: String,
}

impl CreateGateInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("experiment_id", &self.experiment_id),
            ("question", &self.question),
            ("assigned_to", &self.assigned_to),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::Blank { field });
            }
        }
        ensure_finite("sla_hours", self.sla_hours)?;
        if self.sla_hours <= 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "sla_hours",
                value: self.sla_hours,
                min: f64::MIN_POSITIVE,
                max: f64::MAX,
            });
        }
        Ok(())
    }
}

/// Terminal outcome a human can choose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Approved,
    Rejected,
    ApprovedWithConditions,
}

impl GateDecision {
    pub fn status(&self) -> GateStatus {
        match self {
            GateDecision::Approved => GateStatus::Approved,
            GateDecision::Rejected => GateStatus::Rejected,
            GateDecision::ApprovedWithConditions => GateStatus::ApprovedWithConditions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResponse {
    pub gate_id: String,
    pub decision: GateDecision,
    pub decided_by: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

impl GateResponse {
    pub fn new(
        gate_id: impl Into<String>,
        decision: GateDecision,
        decided_by: impl Into<String>,
    ) -> Self {
        Self {
            gate_id: gate_id.into(),
            decision,
            decided_by: decided_by.into(),
            note: None,
            conditions: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.decided_by.trim().is_empty() {
            return Err(ValidationError::Blank {
                field: "decided_by",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input(chain: &[&str]) -> CreateGateInput {
        CreateGateInput {
            experiment_id: "exp-1".into(),
            gate_type: GateType::Ship,
            question: "Ship the new checkout?".into(),
            assigned_to: "alice".into(),
            escalation_chain: chain.iter().map(|s| s.to_string()).collect(),
            sla_hours: 24.0,
            experiment_title: String::new(),
            outcome_title: String::new(),
        }
    }

    fn gate(chain: &[&str]) -> Gate {
        Gate::new(
            "g-1".into(),
            input(chain),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_status_openness() {
        assert!(GateStatus::Pending.is_open());
        assert!(GateStatus::Delegated.is_open());
        for s in [
            GateStatus::Approved,
            GateStatus::Rejected,
            GateStatus::ApprovedWithConditions,
            GateStatus::TimedOut,
        ] {
            assert!(s.is_terminal(), "{}", s.as_str());
        }
    }

    #[test]
    fn test_next_assignee() {
        let mut g = gate(&["alice", "bob", "carol"]);
        assert_eq!(g.next_assignee(), Some("bob"));
        g.assigned_to = "carol".into();
        assert_eq!(g.next_assignee(), None);
        g.assigned_to = "mallory".into();
        assert_eq!(g.next_assignee(), Some("alice"));
        assert_eq!(gate(&[]).next_assignee(), None);

        let mut looped = gate(&["alice", "bob", "alice"]);
        looped.assigned_to = "bob".into();
        assert_eq!(looped.next_assignee(), Some("alice"));
        looped.assigned_to = "alice".into();
        assert_eq!(looped.next_assignee(), None);
    }

    #[test]
    fn test_create_input_validation() {
        assert!(input(&[]).validate().is_ok());
        let mut bad = input(&[]);
        bad.sla_hours = 0.0;
        assert!(bad.validate().is_err());
        let mut bad = input(&[]);
        bad.assigned_to = "  ".into();
        assert_eq!(
            bad.validate(),
            Err(ValidationError::Blank {
                field: "assigned_to"
            })
        );
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&GateStatus::ApprovedWithConditions).unwrap();
        assert_eq!(json, "\"approved_with_conditions\"");
    }
}
