//! Experiment Control Plane
//!
//! Decision and safety core for product experiments: always-valid sequential
//! significance, signal monitoring, automatic kill-switch, portfolio
//! selection and human approval gates with SLA escalation.
//!
//! Everything here is driven by an external scheduler. No module spawns
//! background work of its own.

pub mod clock;
pub mod config;
pub mod error;
pub mod gates;
pub mod kill_switch;
pub mod models;
pub mod portfolio;
pub mod signals;
pub mod stats;
pub mod telemetry;

pub use config::ControlPlaneConfig;
pub use error::{GateError, StoreError, ValidationError};
pub use kill_switch::{AutoKillSwitch, KillAction, KillSwitchConfig, KillSwitchResult, KillTrigger};
pub use models::{Measurement, MeasurementPlan, TargetDirection, Variant};
pub use portfolio::{score_candidate, select_portfolio, Candidate, ScoredCandidate};
pub use stats::{evaluate_significance, SignificanceResult};
