//! WebSocket connection handler.
//!
//! Provides the upgrade handler, the per-connection read loop and control
//! message handling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use panelstream_sdk::ws::SUPERSEDED_REASON;
use panelstream_sdk::{ControlMessage, Envelope, Topic};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::close::CloseReason;
use super::connection::Connection;
use super::messages::{decode_control, encode, error_frame, validate_topic};
use crate::error::StreamError;
use crate::state::AppState;

/// Time the writer gets to flush a final close frame.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler.
///
/// The caller identity comes from the configured query parameter. Without
/// one the socket is upgraded and immediately closed with a policy
/// violation, before anything is registered.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let identity = params
        .get(state.config.identity_param.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    ws.on_upgrade(move |socket| async move {
        match identity {
            Some(identity) => handle_connection(socket, identity, state).await,
            None => reject(socket, state).await,
        }
    })
}

async fn reject(mut socket: WebSocket, state: AppState) {
    state.metrics.record_auth_rejection();
    let err = StreamError::Authentication(format!(
        "missing {} query parameter",
        state.config.identity_param
    ));
    warn!(error = %err, "rejecting WebSocket handshake");
    let _ = socket
        .send(CloseReason::PolicyViolation.frame(&err.to_string()))
        .await;
}

/// Handles a WebSocket connection.
async fn handle_connection(socket: WebSocket, identity: String, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.outbound_capacity);
    let conn = Arc::new(Connection::new(identity, tx));
    state.metrics.record_connection_opened();

    if let Some(previous) = state.registry.register(Arc::clone(&conn)).await {
        previous.terminate(CloseReason::Normal, SUPERSEDED_REASON);
        state.metrics.record_superseded();
        info!(
            identity = %conn.identity(),
            previous = previous.id(),
            current = conn.id(),
            "session superseded"
        );
    }
    info!(connection_id = conn.id(), identity = %conn.identity(), "WebSocket connection opened");

    // Spawn task to forward messages from channel to WebSocket
    let metrics = Arc::clone(&state.metrics);
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                break;
            }
            metrics.record_message_sent();
            if closing {
                break;
            }
        }
    });

    let confirmed = Envelope::connection_confirmed(conn.identity(), conn.id());
    if let Err(e) = send_envelope(&conn, &confirmed) {
        warn!(error = %e, "failed to confirm connection");
    }

    loop {
        tokio::select! {
            () = conn.terminated() => break,
            frame = ws_receiver.next() => match frame {
                Some(Ok(msg)) => {
                    if !handle_frame(msg, &conn, &state).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(connection_id = conn.id(), error = %e, "WebSocket error");
                    state.metrics.record_error();
                    break;
                }
                None => break,
            },
        }
    }

    // Cleanup
    if state.registry.remove_connection(&conn).await {
        state.notifications.forget(conn.identity()).await;
    }
    conn.terminate(CloseReason::Normal, "");
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    state.metrics.record_connection_closed();

    info!(connection_id = conn.id(), identity = %conn.identity(), "WebSocket connection closed");
}

/// Handles one inbound frame. Returns false when the read loop should stop.
async fn handle_frame(msg: Message, conn: &Connection, state: &AppState) -> bool {
    state.metrics.record_message_received();

    match msg {
        Message::Text(text) => {
            if let Err(e) = handle_text(text.as_str(), conn, state).await {
                debug!(connection_id = conn.id(), error = %e, "control message rejected");
                state.metrics.record_error();
                let _ = send_envelope(conn, &error_frame(&e));
            }
            true
        }
        Message::Binary(_) => {
            let err = StreamError::Serialization("binary frames are not supported".to_string());
            state.metrics.record_error();
            let _ = send_envelope(conn, &error_frame(&err));
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            conn.mark_alive();
            true
        }
        Message::Close(_) => {
            debug!(connection_id = conn.id(), "WebSocket close requested");
            false
        }
    }
}

/// Handles a text message from the client.
async fn handle_text(text: &str, conn: &Connection, state: &AppState) -> Result<(), StreamError> {
    let msg = decode_control(text).inspect_err(|e| {
        warn!(connection_id = conn.id(), error = %e, "malformed control message");
    })?;
    handle_control(&msg, conn, state).await
}

/// Applies a control message.
async fn handle_control(
    msg: &ControlMessage,
    conn: &Connection,
    state: &AppState,
) -> Result<(), StreamError> {
    match msg {
        ControlMessage::Ping => {
            conn.mark_alive();
            send_envelope(conn, &Envelope::pong())
        }
        ControlMessage::MarkNotificationRead { notification_id } => {
            state
                .notifications
                .mark_read(conn.identity(), notification_id)
                .await?;
            Ok(())
        }
        ControlMessage::MarkAllRead => {
            state.notifications.mark_all_read(conn.identity()).await?;
            Ok(())
        }
        ControlMessage::Subscribe { .. }
        | ControlMessage::SubscribeAssets { .. }
        | ControlMessage::SubscribePortfolio { .. }
        | ControlMessage::SubscribeChannel { .. } => {
            handle_subscribe(&msg.subscribe_topics(), conn, state).await
        }
        ControlMessage::Unsubscribe { .. }
        | ControlMessage::UnsubscribeAsset { .. }
        | ControlMessage::UnsubscribePortfolio { .. }
        | ControlMessage::UnsubscribeChannel { .. } => {
            handle_unsubscribe(&msg.unsubscribe_topics(), conn, state).await
        }
    }
}

/// Handles a subscribe request. Nothing is applied unless every topic is valid.
async fn handle_subscribe(
    topics: &[Topic],
    conn: &Connection,
    state: &AppState,
) -> Result<(), StreamError> {
    topics.iter().try_for_each(validate_topic)?;

    for topic in topics {
        if state.registry.subscribe(conn, topic.clone()).await? {
            state.metrics.record_subscription();
        }
    }

    debug!(connection_id = conn.id(), count = topics.len(), "subscribed");
    send_envelope(conn, &Envelope::subscribed(topics))
}

/// Handles an unsubscribe request.
async fn handle_unsubscribe(
    topics: &[Topic],
    conn: &Connection,
    state: &AppState,
) -> Result<(), StreamError> {
    topics.iter().try_for_each(validate_topic)?;

    for topic in topics {
        if state.registry.unsubscribe(conn, topic).await {
            state.metrics.record_unsubscription();
        }
    }

    debug!(connection_id = conn.id(), count = topics.len(), "unsubscribed");
    send_envelope(conn, &Envelope::unsubscribed(topics))
}

fn send_envelope(conn: &Connection, envelope: &Envelope) -> Result<(), StreamError> {
    conn.send_text(encode(envelope)?)
}
