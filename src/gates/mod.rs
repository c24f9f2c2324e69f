//! Human approval gates
//!
//! A gate blocks an experiment lifecycle transition until a person answers
//! it or its SLA runs out along the escalation chain.

pub mod manager;
pub mod model;
pub mod notify;
pub mod sla;
pub mod store;

pub use manager::{GateManager, SlaAction, SlaCheckResult, SlaSweepReport};
pub use model::{CreateGateInput, Gate, GateDecision, GateResponse, GateStatus, GateType};
pub use notify::{
    GateNotification, LogNotifier, NotificationChannel, NotificationKind, WebhookNotifier,
};
pub use sla::{evaluate_sla, SlaAssessment};
pub use store::{GateStore, InMemoryGateStore};
