//! Engine event bridge: bus subscriber fanning events out to matching
//! client subscriptions.
//!
//! Subscribes once to the engine bus at gateway start. For each event it
//! walks the client snapshot and applies the delivery rule per subscription:
//! authenticated (or auth not required), event type in the filter, entity in
//! the filter (batched events are filtered per entry), severity at or above
//! the floor. Matches are sent as `{"type": "monitor:<event>", "data",
//! "timestamp"}`; same-type events reach a given client in emission order.

use std::sync::Arc;

use caissa_engine::EngineEvent;
use caissa_models::{EntityAnomalies, Severity};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::client::{GatewayState, Subscription};

pub fn spawn(state: Arc<GatewayState>) -> JoinHandle<()> {
    let mut rx = state.engine().bus().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => deliver(&state, &event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event bridge lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn deliver(state: &Arc<GatewayState>, event: &EngineEvent) {
    let auth_required = state.config().auth_required;
    for (client_id, authenticated, subscriptions) in state.subscription_snapshot().await {
        if auth_required && !authenticated {
            continue;
        }
        for sub in &subscriptions {
            if let Some(frame) = frame_for(event, sub) {
                state.send_json(client_id, frame).await;
            }
        }
    }
}

/// The wire frame this subscription should receive for the event, if any.
fn frame_for(event: &EngineEvent, sub: &Subscription) -> Option<String> {
    if !sub.wants_event(event.event_type()) {
        return None;
    }
    let payload = match event {
        // Batched events are filtered per contained entry; nothing survives,
        // nothing is sent.
        EngineEvent::DataUpdate { updates, cycle_ms, .. } => {
            let filtered: Vec<_> = updates
                .iter()
                .filter(|u| sub.wants_entity(&u.entity_id))
                .collect();
            if filtered.is_empty() {
                return None;
            }
            serde_json::json!({ "updates": filtered, "cycleMs": cycle_ms })
        }
        EngineEvent::AnomaliesDetected { entries, .. } => {
            let filtered: Vec<&EntityAnomalies> = entries
                .iter()
                .filter(|e| sub.wants_entity(&e.entity_id))
                .collect();
            if filtered.is_empty() {
                return None;
            }
            let severity = filtered
                .iter()
                .map(|e| e.severity)
                .max()
                .unwrap_or(Severity::Low);
            if !sub.passes_floor(Some(severity)) {
                return None;
            }
            serde_json::json!({ "entries": filtered, "severity": severity })
        }
        _ => {
            if let Some(entity) = event.entity() {
                if !sub.wants_entity(entity) {
                    return None;
                }
            }
            if !sub.passes_floor(event.severity()) {
                return None;
            }
            event.payload()
        }
    };

    let frame = serde_json::json!({
        "type": event.bridged_type(),
        "data": payload,
        "timestamp": event.ts(),
    });
    Some(frame.to_string())
}
