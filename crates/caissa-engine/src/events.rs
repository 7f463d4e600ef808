//! Engine event types and the broadcast event bus.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use caissa_models::{Alert, EntityAnalysis, EntityAnomalies, Severity};

/// Every event type the engine emits, in canonical wire naming.
pub const ALL_EVENT_TYPES: [&str; 7] = [
    "monitor:added",
    "monitor:removed",
    "monitor:error",
    "data:update",
    "anomalies:detected",
    "alert:generated",
    "alerts:cleared",
];

/// Events published by the scheduler and the alert engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MonitorAdded {
        entity_id: String,
        ts: DateTime<Utc>,
    },
    MonitorRemoved {
        entity_id: String,
        ts: DateTime<Utc>,
    },
    MonitorError {
        entity_id: String,
        error: String,
        ts: DateTime<Utc>,
    },
    /// One batched update per sampling cycle.
    DataUpdate {
        updates: Vec<EntityAnalysis>,
        cycle_ms: u64,
        ts: DateTime<Utc>,
    },
    /// One aggregated report per anomaly cycle that found anything.
    AnomaliesDetected {
        entries: Vec<EntityAnomalies>,
        severity: Severity,
        ts: DateTime<Utc>,
    },
    AlertGenerated { alert: Alert },
    AlertsCleared {
        removed: usize,
        ts: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Canonical event type name, as used in subscription filters.
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::MonitorAdded { .. } => "monitor:added",
            EngineEvent::MonitorRemoved { .. } => "monitor:removed",
            EngineEvent::MonitorError { .. } => "monitor:error",
            EngineEvent::DataUpdate { .. } => "data:update",
            EngineEvent::AnomaliesDetected { .. } => "anomalies:detected",
            EngineEvent::AlertGenerated { .. } => "alert:generated",
            EngineEvent::AlertsCleared { .. } => "alerts:cleared",
        }
    }

    /// Outbound frame type for bridged delivery: `monitor:<event>`, without
    /// double-prefixing event names already in the `monitor:` namespace.
    pub fn bridged_type(&self) -> String {
        let name = self.event_type();
        if name.starts_with("monitor:") {
            name.to_string()
        } else {
            format!("monitor:{name}")
        }
    }

    /// The single entity this event concerns, when it has one. Batched events
    /// are filtered per entry by the bridge instead.
    pub fn entity(&self) -> Option<&str> {
        match self {
            EngineEvent::MonitorAdded { entity_id, .. }
            | EngineEvent::MonitorRemoved { entity_id, .. }
            | EngineEvent::MonitorError { entity_id, .. } => Some(entity_id),
            EngineEvent::AlertGenerated { alert } => Some(&alert.entity_id),
            _ => None,
        }
    }

    /// Severity for floor filtering, when the event carries one.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            EngineEvent::AlertGenerated { alert } => Some(alert.severity),
            EngineEvent::AnomaliesDetected { severity, .. } => Some(*severity),
            _ => None,
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::MonitorAdded { ts, .. }
            | EngineEvent::MonitorRemoved { ts, .. }
            | EngineEvent::MonitorError { ts, .. }
            | EngineEvent::DataUpdate { ts, .. }
            | EngineEvent::AnomaliesDetected { ts, .. }
            | EngineEvent::AlertsCleared { ts, .. } => *ts,
            EngineEvent::AlertGenerated { alert } => alert.ts,
        }
    }

    /// Wire payload for bridged delivery.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            EngineEvent::MonitorAdded { entity_id, .. }
            | EngineEvent::MonitorRemoved { entity_id, .. } => {
                serde_json::json!({ "entityId": entity_id })
            }
            EngineEvent::MonitorError { entity_id, error, .. } => {
                serde_json::json!({ "entityId": entity_id, "error": error })
            }
            EngineEvent::DataUpdate { updates, cycle_ms, .. } => {
                serde_json::json!({ "updates": updates, "cycleMs": cycle_ms })
            }
            EngineEvent::AnomaliesDetected { entries, severity, .. } => {
                serde_json::json!({ "entries": entries, "severity": severity })
            }
            EngineEvent::AlertGenerated { alert } => {
                serde_json::json!({ "alert": alert })
            }
            EngineEvent::AlertsCleared { removed, .. } => {
                serde_json::json!({ "removed": removed })
            }
        }
    }
}

/// Broadcast bus bridging engine events to gateway subscribers.
///
/// Publishing never blocks; with no receivers the event is dropped, and a
/// lagging receiver observes `RecvError::Lagged` rather than slowing the
/// engine down.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::MonitorAdded {
            entity_id: "magnus".to_string(),
            ts: Utc::now(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "monitor:added");
        assert_eq!(event.entity(), Some("magnus"));
    }

    #[test]
    fn test_publish_without_receivers_is_silent() {
        let bus = EventBus::new(16);
        bus.publish(EngineEvent::AlertsCleared {
            removed: 3,
            ts: Utc::now(),
        });
    }

    #[test]
    fn test_bridged_type_never_double_prefixes() {
        let added = EngineEvent::MonitorAdded {
            entity_id: "magnus".to_string(),
            ts: Utc::now(),
        };
        assert_eq!(added.bridged_type(), "monitor:added");

        let cleared = EngineEvent::AlertsCleared {
            removed: 0,
            ts: Utc::now(),
        };
        assert_eq!(cleared.bridged_type(), "monitor:alerts:cleared");
    }
}
