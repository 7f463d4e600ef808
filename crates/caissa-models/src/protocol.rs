//! # WebSocket Wire Protocol
//!
//! Frame types for client/gateway communication.
//!
//! Every inbound frame is `{"type": ..., "data": {...}, "id"?: ...}`; the
//! optional `id` is echoed back as `correlationId` on the direct reply, which
//! is the only request/response pairing over the otherwise asynchronous
//! channel. Outbound frames are `{"type", "data", "correlationId"?,
//! "timestamp"}`.
//!
//! Commands are an adjacently tagged enum rather than string-keyed dispatch,
//! so the gateway's handler match is exhaustive and checked at compile time.
//! Unknown `type` values fail deserialization and surface as a structured
//! `error` reply, never a dropped connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::{Alert, AlertClearFilter, AlertFilter};
use crate::analysis::{Forecast, Severity};
use crate::monitor::{MonitorOptions, ThresholdOverrides};

/// `player:track` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackAction {
    Start,
    Stop,
}

/// Options on `monitor:subscribe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOptions {
    /// Minimum severity for delivered severity-bearing events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_floor: Option<Severity>,
    /// Threshold overrides applied to lazily created monitors.
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerts_enabled: Option<bool>,
}

impl SubscribeOptions {
    /// Monitor options for entities this subscription activates on demand.
    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            thresholds: self.thresholds,
            alerts_enabled: self.alerts_enabled,
        }
    }
}

/// Inbound commands, tagged by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "auth:token")]
    AuthToken { token: String },

    #[serde(rename = "monitor:subscribe")]
    Subscribe {
        #[serde(default)]
        entities: Vec<String>,
        #[serde(default)]
        events: Vec<String>,
        #[serde(default)]
        options: SubscribeOptions,
    },

    #[serde(rename = "monitor:unsubscribe")]
    Unsubscribe {
        #[serde(rename = "subscriptionId", default)]
        subscription_id: Option<Uuid>,
        #[serde(default)]
        entities: Vec<String>,
    },

    #[serde(rename = "room:join")]
    RoomJoin {
        #[serde(rename = "roomName")]
        room_name: String,
    },

    #[serde(rename = "room:leave")]
    RoomLeave {
        #[serde(rename = "roomName")]
        room_name: String,
    },

    #[serde(rename = "player:track")]
    PlayerTrack {
        #[serde(rename = "entityId")]
        entity_id: String,
        action: TrackAction,
        #[serde(default)]
        options: MonitorOptions,
    },

    #[serde(rename = "alerts:get")]
    AlertsGet {
        #[serde(default)]
        filters: AlertFilter,
    },

    #[serde(rename = "alerts:clear")]
    AlertsClear {
        #[serde(default)]
        filters: AlertClearFilter,
    },

    #[serde(rename = "metrics:get")]
    MetricsGet {},

    #[serde(rename = "forecast:request")]
    ForecastRequest {
        #[serde(rename = "entityId")]
        entity_id: String,
        #[serde(default)]
        horizon: Option<usize>,
    },

    #[serde(rename = "ping")]
    Ping {},
}

/// A full inbound frame: command plus optional correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    #[serde(flatten)]
    pub command: ClientCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Outbound messages, tagged by the wire `type` field.
///
/// Engine events bridged to subscribers do not appear here; the bridge
/// serializes them directly as `{"type": "monitor:<event>", "data", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "connection:established")]
    ConnectionEstablished {
        #[serde(rename = "clientId")]
        client_id: Uuid,
        #[serde(rename = "authRequired")]
        auth_required: bool,
    },

    #[serde(rename = "auth:success")]
    AuthSuccess {},

    #[serde(rename = "auth:failed")]
    AuthFailed { reason: String },

    #[serde(rename = "monitor:subscribed")]
    Subscribed {
        #[serde(rename = "subscriptionId")]
        subscription_id: Uuid,
        entities: Vec<String>,
        events: Vec<String>,
    },

    #[serde(rename = "monitor:unsubscribed")]
    Unsubscribed {
        #[serde(rename = "subscriptionId")]
        subscription_id: Uuid,
        /// Entities whose monitors were torn down because no subscription
        /// references them any more.
        released: Vec<String>,
    },

    #[serde(rename = "room:joined")]
    RoomJoined {
        room: String,
        members: Vec<Uuid>,
    },

    #[serde(rename = "room:left")]
    RoomLeft { room: String },

    #[serde(rename = "room:member_joined")]
    MemberJoined {
        room: String,
        #[serde(rename = "clientId")]
        client_id: Uuid,
    },

    #[serde(rename = "room:member_left")]
    MemberLeft {
        room: String,
        #[serde(rename = "clientId")]
        client_id: Uuid,
    },

    #[serde(rename = "room:member_disconnected")]
    MemberDisconnected {
        room: String,
        #[serde(rename = "clientId")]
        client_id: Uuid,
    },

    #[serde(rename = "alerts:list")]
    AlertsList { alerts: Vec<Alert> },

    #[serde(rename = "alerts:cleared")]
    AlertsCleared { removed: usize },

    #[serde(rename = "metrics:data")]
    MetricsData { metrics: serde_json::Value },

    #[serde(rename = "forecast:result")]
    ForecastResult {
        #[serde(rename = "entityId")]
        entity_id: String,
        forecast: Forecast,
    },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error")]
    Error { error: String },
}

/// A full outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(flatten)]
    pub message: ServerMessage,
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutboundFrame {
    /// Wrap a message with the current timestamp and an optional correlation id.
    pub fn new(message: ServerMessage, correlation_id: Option<String>) -> Self {
        Self {
            message,
            correlation_id,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to the wire encoding.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","data":{"error":"serialization failure"}}"#.to_string()
        })
    }
}
