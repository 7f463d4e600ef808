//! Client registry: connection handles, subscriptions, rooms, and the
//! shared gateway state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use axum::extract::ws::{close_code, CloseFrame, Message};
use caissa_engine::MonitorEngine;
use caissa_models::{OutboundFrame, ServerMessage, Severity};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge;
use crate::config::GatewayConfig;
use crate::heartbeat;

/// Gateway-level errors surfaced to clients as structured `error` replies.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Engine(#[from] caissa_engine::EngineError),

    #[error("unknown subscription: {0}")]
    UnknownSubscription(Uuid),

    #[error("subscriptionId required")]
    MissingSubscriptionId,

    #[error("not a member of room {0}")]
    NotInRoom(String),

    #[error("client disconnected")]
    ClientGone,
}

/// A client's filter over entities, event types, and severity.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    /// Empty set means all entities.
    pub entities: HashSet<String>,
    pub events: HashSet<String>,
    pub severity_floor: Option<Severity>,
}

impl Subscription {
    pub fn wants_event(&self, event_type: &str) -> bool {
        self.events.contains(event_type)
    }

    pub fn wants_entity(&self, entity_id: &str) -> bool {
        self.entities.is_empty() || self.entities.contains(entity_id)
    }

    /// Events without a severity always pass the floor.
    pub fn passes_floor(&self, severity: Option<Severity>) -> bool {
        match (self.severity_floor, severity) {
            (Some(floor), Some(severity)) => severity >= floor,
            _ => true,
        }
    }
}

/// Per-connection state held by the registry.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: Uuid,
    sender: mpsc::Sender<Message>,
    pub authenticated: bool,
    pub is_alive: bool,
    pub subscriptions: HashMap<Uuid, Subscription>,
    pub rooms: HashSet<String>,
    pub connected_at: DateTime<Utc>,
}

/// Outcome of detaching entities from a subscription.
#[derive(Debug)]
pub struct DetachOutcome {
    /// Entities whose refcount must be released.
    pub to_release: Vec<String>,
    /// Whether the whole subscription was removed.
    pub removed: bool,
}

/// How a connection ends; a graceful close sends a normal-closure frame,
/// an abrupt one drops the socket so the peer observes an abnormal closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    Graceful,
    Abrupt,
}

/// Shared gateway state: client map, room map, engine handle.
///
/// All maps are mutated only through these methods; none of them hold a lock
/// across an await into the engine or the sockets.
pub struct GatewayState {
    cfg: GatewayConfig,
    engine: Arc<MonitorEngine>,
    clients: RwLock<HashMap<Uuid, ClientHandle>>,
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl GatewayState {
    pub fn new(cfg: GatewayConfig, engine: Arc<MonitorEngine>) -> Self {
        Self {
            cfg,
            engine,
            clients: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    pub fn engine(&self) -> &Arc<MonitorEngine> {
        &self.engine
    }

    /// Spawn the event bridge and the heartbeat supervisor.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("gateway task list poisoned");
        if !tasks.is_empty() {
            return;
        }
        tasks.push(bridge::spawn(Arc::clone(self)));
        tasks.push(heartbeat::spawn(Arc::clone(self)));
    }

    /// Close every connection with a normal-closure frame and stop the
    /// background tasks.
    pub async fn shutdown(self: &Arc<Self>) {
        {
            let mut tasks = self.tasks.lock().expect("gateway task list poisoned");
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        let ids: Vec<Uuid> = self.clients.read().await.keys().copied().collect();
        info!(clients = ids.len(), "gateway shutting down");
        for id in ids {
            self.cleanup_client(id, Disconnect::Graceful).await;
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Admit a new connection, enforcing `max_connections` atomically.
    pub async fn register_client(&self, sender: mpsc::Sender<Message>) -> Option<Uuid> {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.cfg.max_connections {
            return None;
        }
        let id = Uuid::new_v4();
        clients.insert(
            id,
            ClientHandle {
                id,
                sender,
                authenticated: !self.cfg.auth_required,
                is_alive: true,
                subscriptions: HashMap::new(),
                rooms: HashSet::new(),
                connected_at: Utc::now(),
            },
        );
        debug!(client = %id, total = clients.len(), "client connected");
        Some(id)
    }

    /// Tear down a client exactly once: remove the handle, leave all rooms
    /// (notifying remaining members), release subscription refcounts, and
    /// remove monitors nothing references any more. Safe to call from the
    /// socket task, the heartbeat supervisor, and shutdown concurrently; only
    /// the first caller does the work.
    pub async fn cleanup_client(self: &Arc<Self>, client_id: Uuid, mode: Disconnect) {
        let handle = self.clients.write().await.remove(&client_id);
        let Some(handle) = handle else { return };

        if mode == Disconnect::Graceful {
            let _ = handle.sender.try_send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "bye".into(),
            })));
        }
        // Dropping the handle (and with it the sender) ends the writer task;
        // an abrupt disconnect never gets a close frame.

        for room in &handle.rooms {
            let remaining = {
                let mut rooms = self.rooms.write().await;
                match rooms.get_mut(room) {
                    Some(members) => {
                        members.remove(&client_id);
                        if members.is_empty() {
                            rooms.remove(room);
                            Vec::new()
                        } else {
                            members.iter().copied().collect()
                        }
                    }
                    None => Vec::new(),
                }
            };
            for member in remaining {
                self.send_message(
                    member,
                    ServerMessage::MemberDisconnected {
                        room: room.clone(),
                        client_id,
                    },
                    None,
                )
                .await;
            }
        }

        for sub in handle.subscriptions.values() {
            for entity in &sub.entities {
                if self.engine.release_entity(entity).await == 0 {
                    self.engine.remove_monitor(entity).await;
                }
            }
        }

        debug!(
            client = %client_id,
            ?mode,
            connected_at = %handle.connected_at,
            "client cleaned up"
        );
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn set_authenticated(&self, client_id: Uuid, authenticated: bool) {
        if let Some(client) = self.clients.write().await.get_mut(&client_id) {
            client.authenticated = authenticated;
        }
    }

    pub async fn is_authenticated(&self, client_id: Uuid) -> bool {
        self.clients
            .read()
            .await
            .get(&client_id)
            .map(|c| c.authenticated)
            .unwrap_or(false)
    }

    pub async fn mark_alive(&self, client_id: Uuid) {
        if let Some(client) = self.clients.write().await.get_mut(&client_id) {
            client.is_alive = true;
        }
    }

    /// Heartbeat bookkeeping: returns clients that missed the previous ping
    /// (to be terminated) and flips the rest to not-alive after queueing a
    /// ping to each.
    pub async fn heartbeat_sweep(&self) -> Vec<Uuid> {
        let mut stale = Vec::new();
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            if client.is_alive {
                client.is_alive = false;
                let _ = client.sender.try_send(Message::Ping(Vec::new().into()));
            } else {
                stale.push(client.id);
            }
        }
        stale
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub async fn insert_subscription(
        &self,
        client_id: Uuid,
        sub: Subscription,
    ) -> Result<(), GatewayError> {
        let mut clients = self.clients.write().await;
        let client = clients.get_mut(&client_id).ok_or(GatewayError::ClientGone)?;
        client.subscriptions.insert(sub.id, sub);
        Ok(())
    }

    /// Detach entities from a subscription. With an empty entity list the
    /// whole subscription is removed; otherwise its entity filter is narrowed
    /// and the subscription survives unless the filter empties out.
    pub async fn detach_entities(
        &self,
        client_id: Uuid,
        sub_id: Uuid,
        entities: &[String],
    ) -> Result<DetachOutcome, GatewayError> {
        let mut clients = self.clients.write().await;
        let client = clients.get_mut(&client_id).ok_or(GatewayError::ClientGone)?;

        if entities.is_empty() {
            let sub = client
                .subscriptions
                .remove(&sub_id)
                .ok_or(GatewayError::UnknownSubscription(sub_id))?;
            return Ok(DetachOutcome {
                to_release: sub.entities.into_iter().collect(),
                removed: true,
            });
        }

        let sub = client
            .subscriptions
            .get_mut(&sub_id)
            .ok_or(GatewayError::UnknownSubscription(sub_id))?;
        let had_filter = !sub.entities.is_empty();
        let mut to_release = Vec::new();
        for entity in entities {
            if sub.entities.remove(entity) {
                to_release.push(entity.clone());
            }
        }
        let removed = had_filter && sub.entities.is_empty();
        if removed {
            client.subscriptions.remove(&sub_id);
        }
        Ok(DetachOutcome { to_release, removed })
    }

    /// Snapshot for the bridge: id, authenticated flag, and subscriptions.
    pub async fn subscription_snapshot(&self) -> Vec<(Uuid, bool, Vec<Subscription>)> {
        self.clients
            .read()
            .await
            .values()
            .map(|c| {
                (
                    c.id,
                    c.authenticated,
                    c.subscriptions.values().cloned().collect(),
                )
            })
            .collect()
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    /// Join a room, creating it on first join. Returns the members present
    /// before the join (to be notified) and the full membership after.
    pub async fn join_room(
        &self,
        client_id: Uuid,
        room: &str,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>), GatewayError> {
        let mut clients = self.clients.write().await;
        let client = clients.get_mut(&client_id).ok_or(GatewayError::ClientGone)?;
        client.rooms.insert(room.to_string());
        drop(clients);

        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room.to_string()).or_default();
        let before: Vec<Uuid> = members.iter().copied().collect();
        members.insert(client_id);
        let after: Vec<Uuid> = members.iter().copied().collect();
        Ok((before, after))
    }

    /// Leave a room. The last member out deletes the room; otherwise the
    /// remaining members are returned for notification.
    pub async fn leave_room(
        &self,
        client_id: Uuid,
        room: &str,
    ) -> Result<Vec<Uuid>, GatewayError> {
        {
            let mut clients = self.clients.write().await;
            let client = clients.get_mut(&client_id).ok_or(GatewayError::ClientGone)?;
            if !client.rooms.remove(room) {
                return Err(GatewayError::NotInRoom(room.to_string()));
            }
        }

        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(room) {
            Some(members) => {
                members.remove(&client_id);
                if members.is_empty() {
                    rooms.remove(room);
                    Ok(Vec::new())
                } else {
                    Ok(members.iter().copied().collect())
                }
            }
            None => Err(GatewayError::NotInRoom(room.to_string())),
        }
    }

    // =========================================================================
    // Outbound delivery
    // =========================================================================

    /// Queue a frame for one client. A full queue marks the client as a slow
    /// consumer and tears it down abruptly.
    pub async fn send_json(self: &Arc<Self>, client_id: Uuid, text: String) {
        let sender = {
            let clients = self.clients.read().await;
            match clients.get(&client_id) {
                Some(client) => client.sender.clone(),
                None => return,
            }
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(Message::Text(text.into()))
        {
            warn!(client = %client_id, "outbound queue full, dropping slow consumer");
            tokio::spawn(abrupt_cleanup_task(Arc::clone(self), client_id));
        }
    }

    /// Queue a protocol message, stamping timestamp and correlation id.
    pub async fn send_message(
        self: &Arc<Self>,
        client_id: Uuid,
        message: ServerMessage,
        correlation_id: Option<String>,
    ) {
        let frame = OutboundFrame::new(message, correlation_id);
        self.send_json(client_id, frame.to_json()).await;
    }
}

/// Spawn-friendly wrapper for the recursive slow-consumer teardown.
///
/// `send_json` reaches this via `cleanup_client`, which in turn calls
/// `send_json` again; erasing the recursive future behind a function whose
/// return type is an explicitly `Send` boxed future breaks the auto-trait
/// inference cycle that would otherwise leave the spawned future non-`Send`.
fn abrupt_cleanup_task(
    state: Arc<GatewayState>,
    client_id: Uuid,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        state.cleanup_client(client_id, Disconnect::Abrupt).await;
    })
}
