//! Control plane counters and tracing setup
//!
//! Counters are plain atomics exported in Prometheus text format; the
//! orchestrator decides where (if anywhere) to serve them.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Counter registry shared by monitor, kill-switch and gate manager
#[derive(Debug, Default)]
pub struct ControlPlaneMetrics {
    pub significance_evaluations: AtomicU64,
    pub constraint_checks: AtomicU64,
    pub constraint_violations: AtomicU64,
    pub constraint_fetch_failures: AtomicU64,
    pub guard_fetch_failures: AtomicU64,
    pub kills_primary: AtomicU64,
    pub kills_guard: AtomicU64,
    pub kill_action_failures: AtomicU64,
    pub gates_created: AtomicU64,
    pub gate_responses: AtomicU64,
    pub gate_conflicts: AtomicU64,
    pub gate_reminders: AtomicU64,
    pub gate_delegations: AtomicU64,
    pub gate_timeouts: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notification_failures: AtomicU64,
}

impl ControlPlaneMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    fn counters(&self) -> [(&'static str, &'static str, &AtomicU64); 16] {
        [
            (
                "experiment_significance_evaluations_total",
                "Significance evaluations run",
                &self.significance_evaluations,
            ),
            (
                "experiment_constraint_checks_total",
                "Constraint checks evaluated",
                &self.constraint_checks,
            ),
            (
                "experiment_constraint_violations_total",
                "Constraint checks found in violation",
                &self.constraint_violations,
            ),
            (
                "experiment_constraint_fetch_failures_total",
                "Constraint fetches that failed and were degraded",
                &self.constraint_fetch_failures,
            ),
            (
                "experiment_guard_fetch_failures_total",
                "Kill-switch guard fetches skipped after an error",
                &self.guard_fetch_failures,
            ),
            (
                "experiment_kills_primary_total",
                "Kills fired by the primary signal",
                &self.kills_primary,
            ),
            (
                "experiment_kills_guard_total",
                "Kills fired by a guard constraint",
                &self.kills_guard,
            ),
            (
                "experiment_kill_action_failures_total",
                "Kill actions that returned an error",
                &self.kill_action_failures,
            ),
            ("gate_created_total", "Approval gates created", &self.gates_created),
            ("gate_responses_total", "Human responses recorded", &self.gate_responses),
            (
                "gate_conflicts_total",
                "Responses rejected because the gate was already decided",
                &self.gate_conflicts,
            ),
            ("gate_reminders_total", "SLA reminders sent", &self.gate_reminders),
            (
                "gate_delegations_total",
                "Gates escalated to the next assignee",
                &self.gate_delegations,
            ),
            (
                "gate_timeouts_total",
                "Gates that exhausted their escalation chain",
                &self.gate_timeouts,
            ),
            ("gate_notifications_sent_total", "Notifications delivered", &self.notifications_sent),
            (
                "gate_notification_failures_total",
                "Notifications that failed to deliver",
                &self.notification_failures,
            ),
        ]
    }

    /// Export all counters in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for (name, help, counter) in self.counters() {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
        }
        output
    }
}

/// Initialize tracing for binaries, writing to stderr. `RUST_LOG` overrides
/// the default filter.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
