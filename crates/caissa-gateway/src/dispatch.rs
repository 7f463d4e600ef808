//! Inbound frame dispatch.
//!
//! Every text frame is parsed into the typed command enum and handled by an
//! exhaustive match. Malformed or unknown frames produce a structured `error`
//! reply carrying the frame's `id` as `correlationId` when one was present;
//! the connection is never dropped for a bad frame.

use std::collections::HashSet;
use std::sync::Arc;

use caissa_engine::events::ALL_EVENT_TYPES;
use caissa_models::{
    AlertClearFilter, AlertFilter, ClientCommand, CommandFrame, ServerMessage, SubscribeOptions,
    TrackAction,
};
use tracing::debug;
use uuid::Uuid;

use crate::client::{GatewayError, GatewayState, Subscription};

/// Parse and handle one inbound text frame.
pub async fn handle_frame(state: &Arc<GatewayState>, client_id: Uuid, raw: &str) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            state
                .send_message(
                    client_id,
                    ServerMessage::Error {
                        error: format!("malformed message: {err}"),
                    },
                    None,
                )
                .await;
            return;
        }
    };
    // Pull the correlation id out before typed parsing so even an unknown
    // command type gets a pairable error reply.
    let correlation_id = value
        .get("id")
        .and_then(|id| id.as_str())
        .map(str::to_string);
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("<missing>")
        .to_string();

    let frame: CommandFrame = match serde_json::from_value(value) {
        Ok(frame) => frame,
        Err(err) => {
            state
                .send_message(
                    client_id,
                    ServerMessage::Error {
                        error: format!("unrecognized command: {err}"),
                    },
                    correlation_id,
                )
                .await;
            return;
        }
    };

    debug!(client = %client_id, command = %kind, "dispatch");
    match handle_command(state, client_id, frame.command).await {
        Ok(Some(reply)) => state.send_message(client_id, reply, correlation_id).await,
        Ok(None) => {}
        Err(err) => {
            state
                .send_message(
                    client_id,
                    ServerMessage::Error {
                        error: err.to_string(),
                    },
                    correlation_id,
                )
                .await;
        }
    }
}

async fn handle_command(
    state: &Arc<GatewayState>,
    client_id: Uuid,
    command: ClientCommand,
) -> Result<Option<ServerMessage>, GatewayError> {
    match command {
        ClientCommand::AuthToken { token } => Ok(Some(authenticate(state, client_id, &token).await)),

        ClientCommand::Subscribe {
            entities,
            events,
            options,
        } => subscribe(state, client_id, entities, events, options).await,

        ClientCommand::Unsubscribe {
            subscription_id,
            entities,
        } => {
            let sub_id = subscription_id.ok_or(GatewayError::MissingSubscriptionId)?;
            unsubscribe(state, client_id, sub_id, &entities).await
        }

        ClientCommand::RoomJoin { room_name } => {
            let (notify, members) = state.join_room(client_id, &room_name).await?;
            for member in notify {
                state
                    .send_message(
                        member,
                        ServerMessage::MemberJoined {
                            room: room_name.clone(),
                            client_id,
                        },
                        None,
                    )
                    .await;
            }
            Ok(Some(ServerMessage::RoomJoined {
                room: room_name,
                members,
            }))
        }

        ClientCommand::RoomLeave { room_name } => {
            let remaining = state.leave_room(client_id, &room_name).await?;
            for member in remaining {
                state
                    .send_message(
                        member,
                        ServerMessage::MemberLeft {
                            room: room_name.clone(),
                            client_id,
                        },
                        None,
                    )
                    .await;
            }
            Ok(Some(ServerMessage::RoomLeft { room: room_name }))
        }

        ClientCommand::PlayerTrack {
            entity_id,
            action,
            options,
        } => {
            match action {
                TrackAction::Start => {
                    state.engine().add_monitor(&entity_id, &options).await;
                }
                TrackAction::Stop => {
                    state.engine().remove_monitor(&entity_id).await;
                }
            }
            // Feedback arrives as the bridged monitor:added / monitor:removed
            // events; there is no dedicated ack type.
            Ok(None)
        }

        ClientCommand::AlertsGet { filters } => Ok(Some(alerts_get(state, &filters))),

        ClientCommand::AlertsClear { filters } => Ok(Some(alerts_clear(state, &filters))),

        ClientCommand::MetricsGet {} => {
            let engine = state.engine().metrics_snapshot().await;
            let metrics = serde_json::json!({
                "engine": engine,
                "gateway": {
                    "clients": state.client_count().await,
                    "rooms": state.room_count().await,
                },
            });
            Ok(Some(ServerMessage::MetricsData { metrics }))
        }

        ClientCommand::ForecastRequest { entity_id, horizon } => {
            let forecast = state.engine().forecast(&entity_id, horizon).await?;
            Ok(Some(ServerMessage::ForecastResult { entity_id, forecast }))
        }

        ClientCommand::Ping {} => Ok(Some(ServerMessage::Pong)),
    }
}

async fn authenticate(state: &Arc<GatewayState>, client_id: Uuid, token: &str) -> ServerMessage {
    let accepted = match &state.config().auth_token {
        Some(expected) => token == expected,
        None => true,
    };
    if accepted {
        state.set_authenticated(client_id, true).await;
        ServerMessage::AuthSuccess {}
    } else {
        // The connection stays open for a retry.
        ServerMessage::AuthFailed {
            reason: "invalid token".to_string(),
        }
    }
}

/// Create a subscription, lazily activating monitors for entities nobody
/// tracks yet and retaining a reference for each listed entity.
async fn subscribe(
    state: &Arc<GatewayState>,
    client_id: Uuid,
    entities: Vec<String>,
    events: Vec<String>,
    options: SubscribeOptions,
) -> Result<Option<ServerMessage>, GatewayError> {
    let event_set: HashSet<String> = if events.is_empty() {
        ALL_EVENT_TYPES.iter().map(|s| s.to_string()).collect()
    } else {
        events.into_iter().collect()
    };
    let entity_set: HashSet<String> = entities.into_iter().collect();

    let monitor_opts = options.monitor_options();
    for entity in &entity_set {
        if !state.engine().is_monitored(entity).await {
            state.engine().add_monitor(entity, &monitor_opts).await;
        }
        state.engine().retain_entity(entity).await;
    }

    let sub = Subscription {
        id: Uuid::new_v4(),
        entities: entity_set.clone(),
        events: event_set.clone(),
        severity_floor: options.severity_floor,
    };
    let sub_id = sub.id;
    state.insert_subscription(client_id, sub).await?;

    let mut entities: Vec<String> = entity_set.into_iter().collect();
    entities.sort();
    let mut events: Vec<String> = event_set.into_iter().collect();
    events.sort();
    Ok(Some(ServerMessage::Subscribed {
        subscription_id: sub_id,
        entities,
        events,
    }))
}

/// Release entities from a subscription; monitors nobody references any more
/// are torn down.
async fn unsubscribe(
    state: &Arc<GatewayState>,
    client_id: Uuid,
    sub_id: Uuid,
    entities: &[String],
) -> Result<Option<ServerMessage>, GatewayError> {
    let outcome = state.detach_entities(client_id, sub_id, entities).await?;

    let mut released = Vec::new();
    for entity in &outcome.to_release {
        if state.engine().release_entity(entity).await == 0
            && state.engine().remove_monitor(entity).await
        {
            released.push(entity.clone());
        }
    }
    released.sort();
    Ok(Some(ServerMessage::Unsubscribed {
        subscription_id: sub_id,
        released,
    }))
}

fn alerts_get(state: &Arc<GatewayState>, filters: &AlertFilter) -> ServerMessage {
    ServerMessage::AlertsList {
        alerts: state.engine().alerts().get_alerts(filters),
    }
}

fn alerts_clear(state: &Arc<GatewayState>, filters: &AlertClearFilter) -> ServerMessage {
    ServerMessage::AlertsCleared {
        removed: state.engine().alerts().clear_alerts(filters),
    }
}
