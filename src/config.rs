//! Control plane configuration
//!
//! Defaults reproduce the documented behavior. A TOML file may override any
//! field; `EXPERIMENT_CONTROL_*` environment variables override the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::stats::{SequentialTest, DEFAULT_MAX_TEST_STATISTIC, DEFAULT_MIXING_VARIANCE};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub stats: StatsConfig,
    pub monitor: MonitorConfig,
    pub sla: SlaPolicy,
    pub notifications: NotificationConfig,
    pub portfolio: PortfolioConfig,
}

/// Sequential test tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Mixing variance for plans that do not carry their own
    pub mixing_variance: f64,
    /// Cap on the reported test statistic
    pub max_test_statistic: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            mixing_variance: DEFAULT_MIXING_VARIANCE,
            max_test_statistic: DEFAULT_MAX_TEST_STATISTIC,
        }
    }
}

impl StatsConfig {
    pub fn sequential_test(&self) -> SequentialTest {
        SequentialTest::new(self.mixing_variance, self.max_test_statistic)
    }
}

/// Fetch windows and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Window for current-value reads
    pub current_value_window_hours: f64,
    /// Window for constraint checks
    pub constraint_window_hours: f64,
    /// Window for kill-switch guard reads
    pub guard_window_hours: f64,
    /// Ceiling applied on top of each connector's own timeout
    #[serde(with = "duration_serde")]
    pub max_fetch_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            current_value_window_hours: 24.0 * 7.0,
            constraint_window_hours: 1.0,
            guard_window_hours: 24.0,
            max_fetch_timeout: Duration::from_secs(30),
        }
    }
}

fn hours(h: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((h.max(0.0) * 3_600_000.0).round() as i64)
}

impl MonitorConfig {
    pub fn current_value_window(&self) -> chrono::Duration {
        hours(self.current_value_window_hours)
    }

    pub fn constraint_window(&self) -> chrono::Duration {
        hours(self.constraint_window_hours)
    }

    pub fn guard_window(&self) -> chrono::Duration {
        hours(self.guard_window_hours)
    }
}

/// Approval gate SLA behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaPolicy {
    /// Percent of the SLA after which one reminder is sent
    pub remind_at_percent: f64,
    /// Measure a delegated gate's SLA from the delegation instead of creation
    pub restart_clock_on_delegation: bool,
    /// Suggested sweep cadence for the external scheduler
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            remind_at_percent: 50.0,
            restart_clock_on_delegation: false,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Base URL gate links are built from
    pub dashboard_base_url: String,
    /// Optional webhook receiving every notification as JSON
    pub webhook_url: Option<String>,
    /// Upper bound on a single send, any channel
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dashboard_base_url: "http://localhost:3000".into(),
            webhook_url: None,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl NotificationConfig {
    pub fn gate_url(&self, experiment_id: &str, gate_id: &str) -> String {
        format!(
            "{}/experiments/{}/gates/{}",
            self.dashboard_base_url.trim_end_matches('/'),
            experiment_id,
            gate_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub max_concurrent: usize,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

impl ControlPlaneConfig {
    /// Load defaults, then `path` (if given), then `.env` and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = match path {
            Some(p) => {
                info!("Loading config from {}", p.display());
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Invalid config file {}", p.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `EXPERIMENT_CONTROL_*` overrides. Unparseable or out-of-range values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_f64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());

        if let Some(v) = parse_f64("EXPERIMENT_CONTROL_MIXING_VARIANCE").filter(|v| *v > 0.0) {
            self.stats.mixing_variance = v;
        }
        if let Some(v) = parse_f64("EXPERIMENT_CONTROL_REMIND_AT_PERCENT")
            .filter(|v| *v > 0.0 && *v < 100.0)
        {
            self.sla.remind_at_percent = v;
        }
        if let Some(v) = lookup("EXPERIMENT_CONTROL_RESTART_SLA_ON_DELEGATION") {
            self.sla.restart_clock_on_delegation =
                matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
        if let Some(v) = lookup("EXPERIMENT_CONTROL_FETCH_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
        {
            self.monitor.max_fetch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = lookup("EXPERIMENT_CONTROL_DASHBOARD_URL").filter(|v| !v.is_empty()) {
            self.notifications.dashboard_base_url = v;
        }
        if let Some(v) = lookup("EXPERIMENT_CONTROL_WEBHOOK_URL") {
            self.notifications.webhook_url = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("EXPERIMENT_CONTROL_MAX_CONCURRENT")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
        {
            self.portfolio.max_concurrent = v;
        }
        if self.sla.remind_at_percent >= 100.0 {
            warn!(
                remind_at_percent = self.sla.remind_at_percent,
                "reminder threshold at or past the SLA, reminders will never fire"
            );
        }
    }
}

// Serde helper for Duration (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ControlPlaneConfig::default();
        assert_eq!(config.monitor.current_value_window(), chrono::Duration::days(7));
        assert_eq!(config.monitor.constraint_window(), chrono::Duration::hours(1));
        assert_eq!(config.monitor.guard_window(), chrono::Duration::hours(24));
        assert_eq!(config.sla.remind_at_percent, 50.0);
        assert!(!config.sla.restart_clock_on_delegation);
        assert_eq!(config.portfolio.max_concurrent, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ControlPlaneConfig::from_toml_str(
            r#"
            [sla]
            restart_clock_on_delegation = true

            [notifications]
            dashboard_base_url = "https://exp.example.com/"
            "#,
        )
        .expect("valid toml");
        assert!(config.sla.restart_clock_on_delegation);
        assert_eq!(config.sla.remind_at_percent, 50.0);
        assert_eq!(
            config.notifications.gate_url("exp-1", "g-2"),
            "https://exp.example.com/experiments/exp-1/gates/g-2"
        );
    }

    #[test]
    fn test_env_overrides_and_rejects_garbage() {
        let env: HashMap<&str, &str> = [
            ("EXPERIMENT_CONTROL_MIXING_VARIANCE", "0.25"),
            ("EXPERIMENT_CONTROL_REMIND_AT_PERCENT", "150"),
            ("EXPERIMENT_CONTROL_MAX_CONCURRENT", "abc"),
            ("EXPERIMENT_CONTROL_WEBHOOK_URL", "https://hooks.example.com/x"),
            ("EXPERIMENT_CONTROL_FETCH_TIMEOUT_MS", "1500"),
        ]
        .into_iter()
        .collect();

        let mut config = ControlPlaneConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.stats.mixing_variance, 0.25);
        assert_eq!(config.sla.remind_at_percent, 50.0);
        assert_eq!(config.portfolio.max_concurrent, 3);
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://hooks.example.com/x")
        );
        assert_eq!(config.monitor.max_fetch_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[portfolio]\nmax_concurrent = 5").expect("write");
        let config = ControlPlaneConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.portfolio.max_concurrent, 5);
    }
}
