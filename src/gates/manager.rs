//! Gate Manager
//!
//! Owns every state change of an approval gate:
//!
//! ```text
//! pending ──respond──▶ approved | rejected | approved_with_conditions
//!    │
//!    └──SLA overdue──▶ delegated ──respond──▶ (terminal)
//!                          │
//!                          └──SLA overdue, chain exhausted──▶ timed_out
//! ```
//!
//! Writes go through the store's compare-and-set so two concurrent
//! responders can never both win. Transitions are persisted first and
//! notified second; a failed notification is logged and counted only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::model::{CreateGateInput, Gate, GateResponse, GateStatus};
use super::notify::{GateNotification, NotificationChannel, NotificationKind};
use super::sla::{evaluate_sla, SlaAssessment};
use super::store::GateStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{NotificationConfig, SlaPolicy};
use crate::error::{GateError, StoreError};
use crate::telemetry::ControlPlaneMetrics;

/// Read-modify-write attempts before giving up on a contended gate
const MAX_WRITE_ATTEMPTS: usize = 3;

/// What an SLA check did to a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SlaAction {
    None,
    Reminded,
    Delegated { from: String, to: String },
    TimedOut { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaCheckResult {
    pub gate: Gate,
    pub assessment: SlaAssessment,
    pub action: SlaAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlaSweepReport {
    pub checked: usize,
    /// Checks that changed something
    pub actions: Vec<SlaCheckResult>,
    /// Gate ids whose check failed against the store
    pub failed: Vec<String>,
}

pub struct GateManager {
    store: Arc<dyn GateStore>,
    notifier: Arc<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
    sla: SlaPolicy,
    notifications: NotificationConfig,
    metrics: Arc<ControlPlaneMetrics>,
}

impl GateManager {
    pub fn new(store: Arc<dyn GateStore>, notifier: Arc<dyn NotificationChannel>) -> Self {
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
            sla: SlaPolicy::default(),
            notifications: NotificationConfig::default(),
            metrics: Arc::new(ControlPlaneMetrics::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sla_policy(mut self, policy: SlaPolicy) -> Self {
        self.sla = policy;
        self
    }

    pub fn with_notification_config(mut self, config: NotificationConfig) -> Self {
        self.notifications = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ControlPlaneMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn get_gate(&self, gate_id: &str) -> Result<Gate, GateError> {
        self.store
            .find_by_id(gate_id)
            .await?
            .ok_or_else(|| GateError::NotFound {
                gate_id: gate_id.to_string(),
            })
    }

    /// Persist a new pending gate and notify its assignee.
    ///
    /// `notification_sent_at` is only stamped when the send succeeded.
    pub async fn create_gate(&self, input: CreateGateInput) -> Result<Gate, GateError> {
        input.validate()?;

        let now = self.clock.now();
        let gate = Gate::new(uuid::Uuid::new_v4().to_string(), input, now);
        let created = self.store.create(gate).await?;
        ControlPlaneMetrics::incr(&self.metrics.gates_created);
        info!(
            gate_id = %created.id,
            experiment_id = %created.experiment_id,
            gate_type = created.gate_type.as_str(),
            assigned_to = %created.assigned_to,
            sla_hours = created.sla_hours,
            "Gate created"
        );

        if !self.notify(&created, NotificationKind::Assignment).await {
            return Ok(created);
        }

        let mut stamped = created.clone();
        stamped.notification_sent_at = Some(self.clock.now());
        match self.store.update(stamped).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                // A responder may already have won the race; the gate itself is fine.
                warn!(gate_id = %created.id, error = %e, "could not record notification time");
                self.get_gate(&created.id).await
            }
        }
    }

    /// Record a human decision on an open gate.
    pub async fn respond_to_gate(&self, response: GateResponse) -> Result<Gate, GateError> {
        response.validate()?;

        let mut last_conflict = None;
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let mut gate = self.get_gate(&response.gate_id).await?;
            if !gate.status.is_open() {
                ControlPlaneMetrics::incr(&self.metrics.gate_conflicts);
                return Err(GateError::AlreadyDecided {
                    gate_id: gate.id,
                    status: gate.status,
                });
            }

            gate.status = response.decision.status();
            gate.responded_at = Some(self.clock.now());
            gate.decided_by = Some(response.decided_by.clone());
            gate.response_note = response.note.clone();
            gate.conditions = response.conditions.clone();

            match self.store.update(gate).await {
                Ok(saved) => {
                    ControlPlaneMetrics::incr(&self.metrics.gate_responses);
                    info!(
                        gate_id = %saved.id,
                        status = saved.status.as_str(),
                        decided_by = %response.decided_by,
                        "Gate decided"
                    );
                    return Ok(saved);
                }
                Err(e @ StoreError::VersionConflict { .. }) => {
                    debug!(
                        gate_id = %response.gate_id,
                        attempt,
                        "gate changed underneath response, retrying"
                    );
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GateError::Store(last_conflict.unwrap_or_else(|| {
            StoreError::Backend(format!("gate {} update failed", response.gate_id))
        })))
    }

    /// Apply the SLA policy to one gate: remind, delegate or time out.
    ///
    /// Notification failures never surface here; only store failures do.
    pub async fn check_and_handle_sla(&self, gate: &Gate) -> Result<SlaCheckResult, GateError> {
        let mut current = gate.clone();
        let mut last_conflict = None;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let now = self.clock.now();
            let assessment = evaluate_sla(&current, now, &self.sla);
            let (next, action) = match self.plan_transition(&current, &assessment, now) {
                Some(step) => step,
                None => {
                    return Ok(SlaCheckResult {
                        gate: current,
                        assessment,
                        action: SlaAction::None,
                    })
                }
            };

            match self.store.update(next).await {
                Ok(saved) => {
                    self.after_transition(&saved, &action).await;
                    return Ok(SlaCheckResult {
                        gate: saved,
                        assessment,
                        action,
                    });
                }
                Err(e @ StoreError::VersionConflict { .. }) => {
                    debug!(gate_id = %current.id, "gate changed during SLA check, reloading");
                    last_conflict = Some(e);
                    current = self.get_gate(&current.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(GateError::Store(last_conflict.unwrap_or_else(|| {
            StoreError::Backend(format!("gate {} update failed", gate.id))
        })))
    }

    fn plan_transition(
        &self,
        gate: &Gate,
        assessment: &SlaAssessment,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<(Gate, SlaAction)> {
        let mut next = gate.clone();

        if assessment.should_escalate {
            match &assessment.next_assignee {
                Some(to) => {
                    let from = std::mem::replace(&mut next.assigned_to, to.clone());
                    next.status = GateStatus::Delegated;
                    next.delegated_at = Some(now);
                    if self.sla.restart_clock_on_delegation {
                        next.reminder_sent_at = None;
                    }
                    Some((
                        next,
                        SlaAction::Delegated {
                            from,
                            to: to.clone(),
                        },
                    ))
                }
                None => {
                    let reason = format!(
                        "no decision from {} within the {}h SLA and no one left to escalate to",
                        gate.assigned_to, gate.sla_hours
                    );
                    next.status = GateStatus::TimedOut;
                    next.response_note = Some(reason.clone());
                    Some((next, SlaAction::TimedOut { reason }))
                }
            }
        } else if assessment.should_remind {
            next.reminder_sent_at = Some(now);
            Some((next, SlaAction::Reminded))
        } else {
            None
        }
    }

    async fn after_transition(&self, gate: &Gate, action: &SlaAction) {
        match action {
            SlaAction::None => {}
            SlaAction::Reminded => {
                ControlPlaneMetrics::incr(&self.metrics.gate_reminders);
                info!(gate_id = %gate.id, assigned_to = %gate.assigned_to, "SLA reminder");
                self.notify(gate, NotificationKind::Reminder).await;
            }
            SlaAction::Delegated { from, to } => {
                ControlPlaneMetrics::incr(&self.metrics.gate_delegations);
                warn!(
                    gate_id = %gate.id,
                    from = %from,
                    to = %to,
                    "⚠️ Gate SLA breached, escalating"
                );
                self.notify(gate, NotificationKind::Escalation).await;
            }
            SlaAction::TimedOut { reason } => {
                ControlPlaneMetrics::incr(&self.metrics.gate_timeouts);
                warn!(gate_id = %gate.id, reason = %reason, "Gate timed out");
            }
        }
    }

    /// Run the SLA check over every open gate. One gate failing does not
    /// stop the rest.
    pub async fn sweep_sla(&self) -> Result<SlaSweepReport, GateError> {
        let open = self.store.find_open().await?;
        let mut report = SlaSweepReport {
            checked: open.len(),
            ..SlaSweepReport::default()
        };

        for gate in &open {
            match self.check_and_handle_sla(gate).await {
                Ok(result) if result.action != SlaAction::None => report.actions.push(result),
                Ok(_) => {}
                Err(e) => {
                    warn!(gate_id = %gate.id, error = %e, "SLA check failed");
                    report.failed.push(gate.id.clone());
                }
            }
        }

        debug!(
            checked = report.checked,
            acted = report.actions.len(),
            failed = report.failed.len(),
            "SLA sweep complete"
        );
        Ok(report)
    }

    /// Open gates waiting on `assignee`.
    pub async fn pending_for_assignee(&self, assignee: &str) -> Result<Vec<Gate>, GateError> {
        Ok(self.store.find_pending_by_assignee(assignee).await?)
    }

    async fn notify(&self, gate: &Gate, kind: NotificationKind) -> bool {
        let notification = GateNotification::for_gate(gate, kind, &self.notifications);
        let sent = tokio::time::timeout(
            self.notifications.send_timeout,
            self.notifier.send(&notification),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                ControlPlaneMetrics::incr(&self.metrics.notifications_sent);
                true
            }
            Ok(Err(e)) => {
                ControlPlaneMetrics::incr(&self.metrics.notification_failures);
                warn!(gate_id = %gate.id, kind = kind.as_str(), error = %e, "notification failed");
                false
            }
            Err(_) => {
                ControlPlaneMetrics::incr(&self.metrics.notification_failures);
                warn!(gate_id = %gate.id, kind = kind.as_str(), "notification timed out");
                false
            }
        }
    }
}
