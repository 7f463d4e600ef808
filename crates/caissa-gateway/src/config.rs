//! # Configuration Loading
//!
//! TOML-backed configuration for the gateway binary. Every field has a
//! default so an empty file (or no file at all) yields a runnable demo
//! configuration.

use std::time::Duration;

use caissa_engine::EngineConfig;
use serde::Deserialize;

/// Root configuration schema for the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct GatewayConfig {
    /// Listen address for the WebSocket server.
    pub listen: String,
    /// Admission cap; connections beyond this are rejected with a
    /// policy-violation close.
    pub max_connections: usize,
    /// Heartbeat supervisor tick. Detection latency equals one interval.
    pub heartbeat_interval_secs: u64,
    /// Per-client outbound queue cap; overflowing clients are dropped as
    /// slow consumers.
    pub outbound_queue: usize,
    /// When true, event delivery requires a successful `auth:token`.
    pub auth_required: bool,
    /// Shared token checked by `auth:token`. `None` accepts any token.
    pub auth_token: Option<String>,
    /// Players monitored from startup, before any subscription arrives.
    pub tracked: Vec<String>,
    pub engine: EngineSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8765".to_string(),
            max_connections: 500,
            heartbeat_interval_secs: 30,
            outbound_queue: 256,
            auth_required: false,
            auth_token: None,
            tracked: Vec::new(),
            engine: EngineSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("could not read config file {path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse {path}: {e}"))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

/// Engine cadence and window settings, mapped onto `EngineConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineSettings {
    pub sample_interval_secs: u64,
    pub anomaly_interval_secs: u64,
    pub max_data_points: usize,
    pub volatility_window: usize,
    pub forecast_horizon: usize,
    pub stream_ttl_secs: u64,
    /// Seed for the simulated data source.
    pub sim_seed: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_interval_secs: 5,
            anomaly_interval_secs: 30,
            max_data_points: 1000,
            volatility_window: 100,
            forecast_horizon: 10,
            stream_ttl_secs: 3600,
            sim_seed: 42,
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_data_points: self.max_data_points,
            sample_interval: Duration::from_secs(self.sample_interval_secs.max(1)),
            anomaly_interval: Duration::from_secs(self.anomaly_interval_secs.max(1)),
            volatility_window: self.volatility_window,
            forecast_horizon: self.forecast_horizon,
            stream_ttl: Duration::from_secs(self.stream_ttl_secs),
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.max_connections, 500);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert!(!cfg.auth_required);
    }

    #[test]
    fn test_partial_override() {
        let cfg: GatewayConfig = toml::from_str(
            r#"
            max_connections = 10
            tracked = ["magnus", "hikaru"]

            [engine]
            sample_interval_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.tracked, vec!["magnus", "hikaru"]);
        assert_eq!(cfg.engine.sample_interval_secs, 2);
        assert_eq!(cfg.engine.forecast_horizon, 10);
    }
}
