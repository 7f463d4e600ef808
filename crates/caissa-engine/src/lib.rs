//! # Caissa Monitoring Engine
//!
//! The scheduler half of the platform: bounded per-player sample streams, the
//! monitor registry, the two periodic cycles (sampling and anomaly scan),
//! threshold alerting, and the event bus that feeds the gateway.
//!
//! ## Architecture
//! - `store` - fixed-capacity, time-ascending sample streams with FIFO eviction
//! - `registry` - per-player tracking configuration and subscriber refcounts
//! - `source` / `analytics` - async collaborator traits (data source and the
//!   trend/volatility/forecast/anomaly black boxes) plus stand-in
//!   implementations for tests and the demo binary
//! - `alerts` - threshold evaluation and the capped alert log
//! - `events` - broadcast event bus bridging engine events to subscribers
//! - `scheduler` - `MonitorEngine`, the orchestrator that owns all of the above
//!
//! ## Concurrency
//! The sampling cycle is the only stream writer; the anomaly cycle and the
//! gateway handlers only read. Each cycle body is awaited inside its own timer
//! task with missed ticks skipped, so a slow cycle can never overlap itself.

pub mod alerts;
pub mod analytics;
pub mod error;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod store;

pub use alerts::AlertEngine;
pub use analytics::{Analytics, StatAnalytics, VolatilityOptions};
pub use error::EngineError;
pub use events::{EngineEvent, EventBus};
pub use registry::MonitorRegistry;
pub use scheduler::{EngineConfig, EngineMetricsSnapshot, MonitorEngine};
pub use source::{SampleSource, SimulatedSource};
pub use store::{SampleStream, StreamStore};
