//! Threshold evaluation and the capped alert log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use caissa_models::{
    Alert, AlertClearFilter, AlertFilter, AlertKind, EntityAnalysis, Severity, Thresholds,
    TrendDirection,
};

use crate::events::{EngineEvent, EventBus};

/// Projected end-of-horizon shortfall below the current value that arms the
/// forecast warning.
const FORECAST_WARNING_MARGIN: f64 = 30.0;

/// Maximum retained alerts; the oldest is evicted beyond this.
pub const ALERT_LOG_CAPACITY: usize = 100;

/// Threshold evaluation plus the bounded, most-recent-first alert log.
pub struct AlertEngine {
    log: Mutex<VecDeque<Alert>>,
    capacity: usize,
    bus: EventBus,
    generated: AtomicU64,
}

impl AlertEngine {
    pub fn new(bus: EventBus) -> Self {
        Self {
            log: Mutex::new(VecDeque::with_capacity(ALERT_LOG_CAPACITY)),
            capacity: ALERT_LOG_CAPACITY,
            bus,
            generated: AtomicU64::new(0),
        }
    }

    /// Apply the four independent rules to one entity's analysis pass.
    /// Returns candidate alerts; nothing is logged or emitted here.
    pub fn evaluate(
        entity_id: &str,
        analysis: &EntityAnalysis,
        thresholds: &Thresholds,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if let Some(trend) = &analysis.trend {
            if trend.change < -thresholds.rating_drop {
                alerts.push(Alert::new(
                    entity_id,
                    AlertKind::RatingDrop,
                    Severity::High,
                    format!(
                        "rating dropped {:.1} points over the trend window",
                        -trend.change
                    ),
                    trend.change,
                ));
            }
        }

        if let Some(volatility) = &analysis.volatility {
            if volatility.current > thresholds.volatility_spike {
                alerts.push(Alert::new(
                    entity_id,
                    AlertKind::VolatilitySpike,
                    Severity::Medium,
                    format!("volatility at {:.1}", volatility.current),
                    volatility.current,
                ));
            }
        }

        if let Some(win_rate) = analysis.sample.aux.win_rate {
            if win_rate < 0.5 - thresholds.win_rate_drop {
                alerts.push(Alert::new(
                    entity_id,
                    AlertKind::PerformanceDrop,
                    Severity::Medium,
                    format!("win rate down to {:.0}%", win_rate * 100.0),
                    win_rate,
                ));
            }
        }

        if let Some(forecast) = &analysis.forecast {
            if forecast.trend == TrendDirection::Declining {
                if let Some(projected) = forecast.projected_end() {
                    if projected < analysis.sample.value - FORECAST_WARNING_MARGIN {
                        alerts.push(Alert::new(
                            entity_id,
                            AlertKind::ForecastWarning,
                            Severity::Low,
                            format!("forecast projects a decline to {projected:.0}"),
                            projected,
                        ));
                    }
                }
            }
        }

        alerts
    }

    /// Log the alerts (evicting the oldest beyond capacity) and emit
    /// `alert:generated` for each.
    pub fn record(&self, alerts: Vec<Alert>) {
        if alerts.is_empty() {
            return;
        }
        {
            let mut log = self.log.lock().expect("alert log poisoned");
            for alert in &alerts {
                log.push_back(alert.clone());
                while log.len() > self.capacity {
                    log.pop_front();
                }
            }
        }
        self.generated.fetch_add(alerts.len() as u64, Ordering::Relaxed);
        for alert in alerts {
            debug!(entity = %alert.entity_id, kind = ?alert.kind, severity = %alert.severity, "alert generated");
            self.bus.publish(EngineEvent::AlertGenerated { alert });
        }
    }

    /// Query the log, most-recent-first, honoring the filter's limit.
    pub fn get_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let log = self.log.lock().expect("alert log poisoned");
        let limit = filter.limit.unwrap_or(usize::MAX);
        log.iter()
            .rev()
            .filter(|alert| filter.matches(alert))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Purge matching alerts; returns how many were removed and emits
    /// `alerts:cleared`.
    pub fn clear_alerts(&self, filter: &AlertClearFilter) -> usize {
        let removed = {
            let mut log = self.log.lock().expect("alert log poisoned");
            let before = log.len();
            log.retain(|alert| !filter.removes(alert));
            before - log.len()
        };
        self.bus.publish(EngineEvent::AlertsCleared {
            removed,
            ts: Utc::now(),
        });
        removed
    }

    /// Currently retained alerts.
    pub fn len(&self) -> usize {
        self.log.lock().expect("alert log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Alerts generated since startup, including evicted ones.
    pub fn total_generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }
}
