//! Signal connector contract
//!
//! Analytics vendors plug in behind [`SignalConnector`]. The control plane
//! only ever talks to this trait; adapters are looked up by their provider
//! tag in a [`ConnectorRegistry`] built at startup and passed down
//! explicitly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{MetricDescriptor, MetricValue, TimeRange, VariantMetricValue};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Per-experiment connector settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Provider type tag used to pick the adapter
    pub provider: String,
    /// Adapter-specific settings (project id, API host, ...)
    #[serde(default)]
    pub settings: HashMap<String, String>,
    /// Upper bound on a single fetch
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ConnectorConfig {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            settings: HashMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub success: bool,
    pub message: String,
}

/// Why a fetch did not produce a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    Timeout { metric: String, after_ms: u64 },
    Unavailable(String),
    UnknownMetric(String),
    Unauthorized(String),
    UnknownProvider(String),
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { metric, after_ms } => {
                write!(f, "fetch of {} timed out after {}ms", metric, after_ms)
            }
            Self::Unavailable(msg) => write!(f, "connector unavailable: {}", msg),
            Self::UnknownMetric(metric) => write!(f, "unknown metric: {}", metric),
            Self::Unauthorized(msg) => write!(f, "connector rejected credentials: {}", msg),
            Self::UnknownProvider(tag) => write!(f, "no connector registered for '{}'", tag),
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Capability every analytics adapter provides
#[async_trait::async_trait]
pub trait SignalConnector: Send + Sync {
    /// Provider type tag this adapter answers to
    fn provider(&self) -> &str;

    async fn test_connection(&self, config: &ConnectorConfig) -> ConnectionStatus;

    async fn fetch_metric(
        &self,
        metric: &str,
        range: TimeRange,
        segment: Option<&str>,
        config: &ConnectorConfig,
    ) -> Result<MetricValue, ConnectorError>;

    async fn fetch_variant_metric(
        &self,
        metric: &str,
        variant_key: &str,
        range: TimeRange,
        config: &ConnectorConfig,
    ) -> Result<VariantMetricValue, ConnectorError>;

    async fn list_metrics(
        &self,
        config: &ConnectorConfig,
    ) -> Result<Vec<MetricDescriptor>, ConnectorError>;
}

/// Adapters keyed by provider tag
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn SignalConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own provider tag, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn SignalConnector>) {
        self.connectors
            .insert(connector.provider().to_string(), connector);
    }

    pub fn with(mut self, connector: Arc<dyn SignalConnector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn SignalConnector>, ConnectorError> {
        self.connectors
            .get(provider)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownProvider(provider.to_string()))
    }

    pub fn resolve(
        &self,
        config: &ConnectorConfig,
    ) -> Result<Arc<dyn SignalConnector>, ConnectorError> {
        self.get(&config.provider)
    }

    pub fn providers(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.connectors.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

/// Fixed values served by [`SnapshotConnector`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    /// metric (or `metric@segment`) -> value
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    /// metric -> (control, treatment)
    #[serde(default)]
    pub variant_metrics: HashMap<String, (f64, f64)>,
    /// metrics whose fetch fails
    #[serde(default)]
    pub failing: HashSet<String>,
}

/// Record of one fetch served by a [`SnapshotConnector`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRecord {
    pub metric: String,
    pub range: TimeRange,
    pub segment: Option<String>,
}

/// In-memory provider serving pre-loaded values.
///
/// Used for dry runs from recorded snapshots and as a test double.
#[derive(Debug)]
pub struct SnapshotConnector {
    tag: String,
    data: RwLock<SnapshotData>,
    fetches: RwLock<Vec<FetchRecord>>,
    delay: Option<Duration>,
}

impl SnapshotConnector {
    pub const PROVIDER: &'static str = "snapshot";

    pub fn new(data: SnapshotData) -> Self {
        Self::with_provider(Self::PROVIDER, data)
    }

    pub fn with_provider(tag: impl Into<String>, data: SnapshotData) -> Self {
        Self {
            tag: tag.into(),
            data: RwLock::new(data),
            fetches: RwLock::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep this long before answering any fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_metric(&self, metric: &str, value: f64) {
        self.data.write().metrics.insert(metric.to_string(), value);
    }

    pub fn set_variant_metric(&self, metric: &str, control: f64, treatment: f64) {
        self.data
            .write()
            .variant_metrics
            .insert(metric.to_string(), (control, treatment));
    }

    pub fn fail_metric(&self, metric: &str) {
        self.data.write().failing.insert(metric.to_string());
    }

    pub fn fetches(&self) -> Vec<FetchRecord> {
        self.fetches.read().clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, metric: &str, range: TimeRange, segment: Option<&str>) {
        self.fetches.write().push(FetchRecord {
            metric: metric.to_string(),
            range,
            segment: segment.map(str::to_string),
        });
    }
}

#[async_trait::async_trait]
impl SignalConnector for SnapshotConnector {
    fn provider(&self) -> &str {
        &self.tag
    }

    async fn test_connection(&self, _config: &ConnectorConfig) -> ConnectionStatus {
        let data = self.data.read();
        ConnectionStatus {
            success: true,
            message: format!(
                "snapshot with {} metrics, {} variant metrics",
                data.metrics.len(),
                data.variant_metrics.len()
            ),
        }
    }

    async fn fetch_metric(
        &self,
        metric: &str,
        range: TimeRange,
        segment: Option<&str>,
        _config: &ConnectorConfig,
    ) -> Result<MetricValue, ConnectorError> {
        self.record(metric, range, segment);
        self.pause().await;

        let data = self.data.read();
        if data.failing.contains(metric) {
            return Err(ConnectorError::Unavailable(format!(
                "snapshot fetch of {} failed",
                metric
            )));
        }
        let value = segment
            .and_then(|s| data.metrics.get(&format!("{}@{}", metric, s)))
            .or_else(|| data.metrics.get(metric))
            .copied()
            .ok_or_else(|| ConnectorError::UnknownMetric(metric.to_string()))?;

        Ok(MetricValue {
            value,
            sample_size: None,
            timestamp: range.end,
        })
    }

    async fn fetch_variant_metric(
        &self,
        metric: &str,
        _variant_key: &str,
        range: TimeRange,
        _config: &ConnectorConfig,
    ) -> Result<VariantMetricValue, ConnectorError> {
        self.record(metric, range, None);
        self.pause().await;

        let data = self.data.read();
        if data.failing.contains(metric) {
            return Err(ConnectorError::Unavailable(format!(
                "snapshot fetch of {} failed",
                metric
            )));
        }
        let (control, treatment) = data
            .variant_metrics
            .get(metric)
            .copied()
            .ok_or_else(|| ConnectorError::UnknownMetric(metric.to_string()))?;

        Ok(VariantMetricValue {
            control: MetricValue {
                value: control,
                sample_size: None,
                timestamp: range.end,
            },
            treatment: MetricValue {
                value: treatment,
                sample_size: None,
                timestamp: range.end,
            },
        })
    }

    async fn list_metrics(
        &self,
        _config: &ConnectorConfig,
    ) -> Result<Vec<MetricDescriptor>, ConnectorError> {
        let data = self.data.read();
        let mut names: Vec<(String, &str)> = data
            .metrics
            .keys()
            .filter(|k| !k.contains('@'))
            .map(|k| (k.clone(), "gauge"))
            .chain(data.variant_metrics.keys().map(|k| (k.clone(), "variant")))
            .collect();
        names.sort();
        names.dedup_by(|a, b| a.0 == b.0);
        Ok(names
            .into_iter()
            .map(|(name, kind)| MetricDescriptor {
                name,
                kind: kind.to_string(),
                description: None,
            })
            .collect())
    }
}
