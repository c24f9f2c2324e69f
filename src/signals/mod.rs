//! Signal connectors and monitoring

pub mod connector;
pub mod monitor;

pub use connector::{
    ConnectionStatus, ConnectorConfig, ConnectorError, ConnectorRegistry, FetchRecord,
    SignalConnector, SnapshotConnector, SnapshotData,
};
pub use monitor::SignalMonitor;
