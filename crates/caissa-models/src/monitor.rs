//! Monitor configuration: tracking flags, thresholds, lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert thresholds for one monitored player.
///
/// Values are interpreted by the alert rules in `caissa-engine`:
/// a trend change below `-rating_drop` is a high-severity alert, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    /// Rating decline over the trend window that triggers `rating_drop`.
    pub rating_drop: f64,
    /// Current volatility level that triggers `volatility_spike`.
    pub volatility_spike: f64,
    /// Win-rate shortfall below 0.5 that triggers `performance_drop`.
    pub win_rate_drop: f64,
    /// Anomaly score cutoff handed to the anomaly detector.
    pub anomaly_score: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            rating_drop: 50.0,
            volatility_spike: 30.0,
            win_rate_drop: 0.1,
            anomaly_score: 2.0,
        }
    }
}

/// Partial threshold overrides supplied per monitor; merged over the
/// process-wide defaults at `add_monitor` time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_drop: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility_spike: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_rate_drop: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
}

impl ThresholdOverrides {
    /// Merge these overrides over a base set of thresholds.
    pub fn merge_over(&self, base: Thresholds) -> Thresholds {
        Thresholds {
            rating_drop: self.rating_drop.unwrap_or(base.rating_drop),
            volatility_spike: self.volatility_spike.unwrap_or(base.volatility_spike),
            win_rate_drop: self.win_rate_drop.unwrap_or(base.win_rate_drop),
            anomaly_score: self.anomaly_score.unwrap_or(base.anomaly_score),
        }
    }
}

/// What a monitor tracks and whether it may raise alerts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Track the primary rating value.
    pub track_rating: bool,
    /// Track auxiliary game statistics (win rate).
    pub track_games: bool,
    /// Whether threshold evaluation runs for this monitor.
    pub alerts_enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            track_rating: true,
            track_games: true,
            alerts_enabled: true,
        }
    }
}

/// Options accepted by `add_monitor` and `monitor:subscribe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorOptions {
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts_enabled: Option<bool>,
}

/// Monitor lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Active,
    Inactive,
}

/// Active tracking configuration for one player.
///
/// 1:1 with a sample stream while active. Removing the monitor keeps the
/// stream; streams are reclaimed separately by the engine's TTL sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub entity_id: String,
    pub config: MonitorConfig,
    pub thresholds: Thresholds,
    pub status: MonitorStatus,
    /// Completion time of the most recent sampling pass for this entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

impl Monitor {
    /// Build an active monitor from per-monitor options and process defaults.
    pub fn new(entity_id: impl Into<String>, opts: &MonitorOptions, defaults: Thresholds) -> Self {
        let mut config = MonitorConfig::default();
        if let Some(enabled) = opts.alerts_enabled {
            config.alerts_enabled = enabled;
        }
        Self {
            entity_id: entity_id.into(),
            config,
            thresholds: opts.thresholds.merge_over(defaults),
            status: MonitorStatus::Active,
            last_check: None,
        }
    }
}
