//! Heartbeat supervisor: protocol-level ping/pong liveness detection.
//!
//! Each tick, every client that failed to pong since the previous tick is
//! terminated abruptly (no close frame, so half-open peers observe an
//! abnormal closure) through the same cleanup path as a normal disconnect.
//! Everyone else is flipped to not-alive and pinged again. Detection latency
//! is one heartbeat interval.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::client::{Disconnect, GatewayState};

pub fn spawn(state: Arc<GatewayState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.config().heartbeat_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer.tick().await; // immediate first tick
        loop {
            timer.tick().await;
            let stale = state.heartbeat_sweep().await;
            for client_id in stale {
                warn!(client = %client_id, "heartbeat timeout, terminating");
                state.cleanup_client(client_id, Disconnect::Abrupt).await;
            }
        }
    })
}
