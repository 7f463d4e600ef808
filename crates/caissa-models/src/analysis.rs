//! Analytic result types consumed as opaque collaborator outputs.
//!
//! Trend, volatility, forecast, and anomaly values are produced behind the
//! `Analytics` trait in `caissa-engine`; the engine only gates them on
//! minimum sample counts and forwards them. All analytic fields on the
//! batched cycle payloads are `Option` so a below-threshold analytic is
//! absent, never a fabricated default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::Sample;

/// Direction of a fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

/// Trend over the recent window (last 20 samples, min 10).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub direction: TrendDirection,
    /// Net change over the window (last value minus first).
    pub change: f64,
    /// Fitted per-sample slope.
    pub slope: f64,
}

/// Volatility over a sliding window (min 30 samples).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volatility {
    /// Dispersion over the most recent sub-window.
    pub current: f64,
    /// Mean dispersion over the whole window.
    pub mean: f64,
    /// Fraction of sub-windows with above-mean dispersion, in `[0.0, 1.0]`.
    pub persistence: f64,
}

/// One projected point of a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub ts: DateTime<Utc>,
    pub value: f64,
}

/// Forecast over a fixed horizon (min 50 samples).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    /// Projected values, one per horizon step.
    pub values: Vec<ForecastPoint>,
    pub trend: TrendDirection,
    /// Fit confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

impl Forecast {
    /// Projected value at the end of the horizon, if any.
    pub fn projected_end(&self) -> Option<f64> {
        self.values.last().map(|p| p.value)
    }
}

/// One detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPoint {
    pub ts: DateTime<Utc>,
    pub value: f64,
    /// Detector score; higher is more anomalous.
    pub score: f64,
}

/// Alert / anomaly severity, ordered weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity from a maximum anomaly score using the fixed cut-offs:
    /// `>4` critical, `>3` high, `>2` medium, else low.
    pub fn from_anomaly_score(score: f64) -> Self {
        if score > 4.0 {
            Severity::Critical
        } else if score > 3.0 {
            Severity::High
        } else if score > 2.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Per-entity result of one sampling pass; one entry of the batched
/// `data:update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAnalysis {
    pub entity_id: String,
    /// The sample recorded this pass.
    pub sample: Sample,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility: Option<Volatility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<Forecast>,
}

/// Per-entity entry of the aggregated `anomalies:detected` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAnomalies {
    pub entity_id: String,
    /// Up to five strongest anomalies for this entity.
    pub anomalies: Vec<AnomalyPoint>,
    pub max_score: f64,
    pub severity: Severity,
}
