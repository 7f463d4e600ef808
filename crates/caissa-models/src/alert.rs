//! Alert types and query/purge filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::Severity;

/// The four alert rules the engine evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RatingDrop,
    VolatilitySpike,
    PerformanceDrop,
    ForecastWarning,
}

/// A single threshold-violation event.
///
/// Immutable after creation; lives in the engine's capped alert log until
/// evicted or purged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub entity_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    /// The measured value that violated the threshold.
    pub value: f64,
    pub ts: DateTime<Utc>,
}

impl Alert {
    /// Stamp a new alert with a fresh id and the current time.
    pub fn new(
        entity_id: impl Into<String>,
        kind: AlertKind,
        severity: Severity,
        message: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: entity_id.into(),
            kind,
            severity,
            message: message.into(),
            value,
            ts: Utc::now(),
        }
    }
}

/// Query filter for `alerts:get`. All fields are conjunctive; absent fields
/// do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AlertKind>,
    /// Only alerts at or after this timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Result-count cap, most-recent-first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AlertFilter {
    /// Whether an alert passes every present constraint except the limit.
    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(entity) = &self.entity_id {
            if &alert.entity_id != entity {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if alert.severity != severity {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if alert.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if alert.ts < since {
                return false;
            }
        }
        true
    }
}

/// Purge filter for `alerts:clear`: clear-all when empty, otherwise
/// by-entity and/or older-than.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertClearFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than: Option<DateTime<Utc>>,
}

impl AlertClearFilter {
    /// Whether an alert should be removed by this purge.
    pub fn removes(&self, alert: &Alert) -> bool {
        if let Some(entity) = &self.entity_id {
            if &alert.entity_id != entity {
                return false;
            }
        }
        if let Some(cutoff) = self.older_than {
            if alert.ts >= cutoff {
                return false;
            }
        }
        true
    }
}
