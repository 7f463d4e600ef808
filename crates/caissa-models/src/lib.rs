//! # Caissa Models Crate
//!
//! Platform-wide canonical types for the player monitoring pipeline.
//!
//! This crate provides:
//! - `Sample` / `SampleAux` - one performance observation for a tracked player
//! - `Monitor` / `Thresholds` - tracking configuration and alert thresholds
//! - Analytic result types (`Trend`, `Volatility`, `Forecast`, anomalies)
//! - `Alert` and its query/purge filters
//! - The WebSocket wire protocol (`ClientCommand`, `ServerMessage`)
//!
//! Types here carry no behavior beyond construction, merging, and
//! serialization; the engine and gateway crates own all logic.

pub mod alert;
pub mod analysis;
pub mod monitor;
pub mod protocol;
pub mod sample;

pub use alert::{Alert, AlertClearFilter, AlertFilter, AlertKind};
pub use analysis::{
    AnomalyPoint, EntityAnalysis, EntityAnomalies, Forecast, ForecastPoint, Severity, Trend,
    TrendDirection, Volatility,
};
pub use monitor::{Monitor, MonitorConfig, MonitorOptions, MonitorStatus, Thresholds, ThresholdOverrides};
pub use protocol::{
    ClientCommand, CommandFrame, OutboundFrame, ServerMessage, SubscribeOptions, TrackAction,
};
pub use sample::{Sample, SampleAux};
