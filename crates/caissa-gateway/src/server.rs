//! WebSocket server: router, upgrade handling, and the per-socket task pair.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use caissa_models::ServerMessage;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::{Disconnect, GatewayState};
use crate::dispatch;

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves.
pub async fn serve(
    state: Arc<GatewayState>,
    listener: tokio::net::TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "caissa-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection from admission to cleanup.
async fn handle_socket(mut socket: WebSocket, state: Arc<GatewayState>) {
    let (tx, mut rx) = mpsc::channel::<Message>(state.config().outbound_queue);

    // Admission control happens inside register_client, atomically against
    // the client map.
    let Some(client_id) = state.register_client(tx).await else {
        info!("connection rejected: max connections reached");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "max connections reached".into(),
            })))
            .await;
        return;
    };

    state
        .send_message(
            client_id,
            ServerMessage::ConnectionEstablished {
                client_id,
                auth_required: state.config().auth_required,
            },
            None,
        )
        .await;

    let (mut sink, mut stream) = socket.split();

    // Writer: drains the client's outbound queue into the socket. Ends when
    // the queue closes (cleanup dropped the handle) or the peer goes away.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    // Reader: dispatches inbound frames and feeds pongs to the heartbeat.
    let reader_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    dispatch::handle_frame(&reader_state, client_id, text.as_str()).await;
                }
                Message::Pong(_) => reader_state.mark_alive(client_id).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!(client = %client_id, "socket closed");
    state.cleanup_client(client_id, Disconnect::Abrupt).await;
}
