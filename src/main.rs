//! Experiment Control CLI
//!
//! Runs the control plane's decisions once against JSON inputs. Useful for
//! replaying a scheduler tick by hand or auditing a past decision.
//!
//! Usage:
//!   experiment-control significance run.json
//!   experiment-control interval control.json treatment.json --confidence 0.9
//!   experiment-control portfolio candidates.json --max-concurrent 2
//!   experiment-control kill-check request.json
//!   experiment-control sla gates.json --at 2024-05-01T12:00:00Z
//!
//! Environment Variables:
//!   EXPERIMENT_CONTROL_CONFIG - Path to TOML config file
//!   RUST_LOG - Log filter (default: experiment_control=info)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use experiment_control::clock::{Clock, ManualClock, SystemClock};
use experiment_control::config::ControlPlaneConfig;
use experiment_control::gates::{Gate, GateManager, GateStore, InMemoryGateStore, WebhookNotifier};
use experiment_control::kill_switch::{AutoKillSwitch, KillSwitchConfig, LogKillAction};
use experiment_control::models::{Measurement, MeasurementPlan};
use experiment_control::portfolio::{score_all, select_portfolio, Candidate};
use experiment_control::signals::{
    ConnectorRegistry, SignalMonitor, SnapshotConnector, SnapshotData,
};
use experiment_control::stats::{confidence_interval, relative_lift, IntervalEstimate};
use experiment_control::telemetry::{init_tracing, ControlPlaneMetrics};

#[derive(Parser, Debug)]
#[command(name = "experiment-control")]
#[command(about = "Experiment decision and safety control plane")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, env = "EXPERIMENT_CONTROL_CONFIG")]
    config: Option<PathBuf>,

    /// Print control plane counters (Prometheus format) to stderr when done
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sequential significance of a measurement set
    Significance {
        /// JSON file: { "plan": {...}, "measurements": [...] }
        input: PathBuf,
    },

    /// Fixed-sample confidence interval for the difference and relative lift
    Interval {
        /// JSON array of control values
        control: PathBuf,
        /// JSON array of treatment values
        treatment: PathBuf,
        #[arg(long, default_value = "0.95")]
        confidence: f64,
    },

    /// Score candidates and select a non-conflicting portfolio
    Portfolio {
        /// JSON array of candidates
        input: PathBuf,
        /// Overrides `portfolio.max_concurrent`
        #[arg(short, long)]
        max_concurrent: Option<usize>,
    },

    /// Dry-run the kill-switch against snapshot signal values
    KillCheck {
        /// JSON file: { "config", "plan", "measurements", "signals" }
        input: PathBuf,
    },

    /// Run one SLA sweep over a set of gates
    Sla {
        /// JSON array of gates
        input: PathBuf,
        /// Evaluate as of this instant (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Deserialize)]
struct SignificanceInput {
    plan: MeasurementPlan,
    measurements: Vec<Measurement>,
}

#[derive(Debug, Deserialize)]
struct KillCheckInput {
    config: KillSwitchConfig,
    plan: MeasurementPlan,
    #[serde(default)]
    measurements: Vec<Measurement>,
    /// Guard metric values served to the switch
    #[serde(default)]
    signals: SnapshotData,
}

#[derive(Debug, Serialize)]
struct IntervalReport {
    difference: IntervalEstimate,
    relative_lift: Option<IntervalEstimate>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("experiment_control=info");

    let config = ControlPlaneConfig::load(cli.config.as_deref())?;
    let metrics = Arc::new(ControlPlaneMetrics::new());

    match cli.command {
        Commands::Significance { input } => {
            let input: SignificanceInput = read_json(&input)?;
            input.plan.validate()?;
            let test = config.stats.sequential_test();
            print_json(&test.evaluate(&input.measurements, &input.plan))?;
        }
        Commands::Interval {
            control,
            treatment,
            confidence,
        } => {
            let control: Vec<f64> = read_json(&control)?;
            let treatment: Vec<f64> = read_json(&treatment)?;
            let report = IntervalReport {
                difference: confidence_interval(&control, &treatment, confidence)?,
                relative_lift: relative_lift(&control, &treatment, confidence)?,
            };
            print_json(&report)?;
        }
        Commands::Portfolio {
            input,
            max_concurrent,
        } => {
            let candidates: Vec<Candidate> = read_json(&input)?;
            let max = max_concurrent.unwrap_or(config.portfolio.max_concurrent);
            let scored = score_all(&candidates)?;
            let selected = select_portfolio(&scored, max);
            info!(
                candidates = candidates.len(),
                selected = selected.len(),
                max_concurrent = max,
                "Portfolio selected"
            );
            print_json(&selected)?;
        }
        Commands::KillCheck { input } => {
            let input: KillCheckInput = read_json(&input)?;
            input.plan.validate()?;
            let registry = Arc::new(
                ConnectorRegistry::new().with(Arc::new(SnapshotConnector::with_provider(
                    input.config.connector.provider.clone(),
                    input.signals,
                ))),
            );
            let monitor = SignalMonitor::new(registry, config.monitor.clone())
                .with_sequential_test(config.stats.sequential_test())
                .with_metrics(metrics.clone());
            let switch = AutoKillSwitch::new(Arc::new(monitor), Arc::new(LogKillAction))
                .with_metrics(metrics.clone());
            let result = switch
                .check(&input.config, &input.measurements, &input.plan)
                .await;
            print_json(&result)?;
        }
        Commands::Sla { input, at } => {
            let gates: Vec<Gate> = read_json(&input)?;
            let store = Arc::new(InMemoryGateStore::new());
            for gate in gates {
                store.create(gate).await?;
            }
            let clock: Arc<dyn Clock> = match at {
                Some(at) => Arc::new(ManualClock::new(at)),
                None => Arc::new(SystemClock),
            };
            let notifier = WebhookNotifier::from_config(&config.notifications)?;
            let manager = GateManager::new(store, Arc::from(notifier))
                .with_clock(clock)
                .with_sla_policy(config.sla.clone())
                .with_notification_config(config.notifications.clone())
                .with_metrics(metrics.clone());
            print_json(&manager.sweep_sla().await?)?;
        }
    }

    if cli.metrics {
        eprint!("{}", metrics.to_prometheus());
    }
    Ok(())
}
