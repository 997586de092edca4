//! Signaling WebSocket handler
//!
//! One socket per client. Inbound text frames are decoded into
//! [`ClientFrame`]s and each one is dispatched on its own task, so a slow
//! engine call never holds up the next request. Everything sent back (acks,
//! SFU notifications and presence frames) funnels through a single writer
//! task that owns the sink.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use huddle_sfu::{Notification, PeerId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::dispatch::Session;
use crate::http::AppState;
use crate::protocol::{AckFrame, ClientFrame, PushFrame, ServerFrame};

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Signaling frames are small; the 64MB default is excessive
    ws.max_message_size(state.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = %e, "Failed to encode server frame");
            None
        }
    }
}

fn push_notification(notification: &Notification) -> Option<String> {
    match PushFrame::try_from(notification) {
        Ok(push) => encode(&ServerFrame::Push(push)),
        Err(e) => {
            error!(error = %e, event = notification.event_name(), "Failed to encode notification");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = nanoid::nanoid!();
    let peer_id = PeerId::from(connection_id.as_str());
    info!(connection_id = %connection_id, "Client connected");

    let (frames_tx, mut frames_rx) =
        mpsc::channel::<ServerFrame>(state.server.outbound_buffer.max(1));
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<Notification>();
    let mut presence_rx = state.presence.subscribe(&connection_id);

    let session = Arc::new(Session::new(
        peer_id.clone(),
        Arc::clone(&state.sfu),
        state.presence.clone(),
        notify_tx,
    ));

    let (mut sink, mut stream) = socket.split();

    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(frame) = frames_rx.recv() => encode(&frame),
                Some(notification) = notify_rx.recv() => push_notification(&notification),
                Some(push) = presence_rx.recv() => encode(&ServerFrame::Push(push)),
                else => break,
            };
            let Some(text) = text else { continue };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(connection_id = %writer_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let tracker = TaskTracker::new();

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket receive failed");
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Dropping malformed frame");
                continue;
            }
        };

        let session = Arc::clone(&session);
        let frames = frames_tx.clone();
        tracker.spawn(async move {
            let ClientFrame { event, data, ack } = frame;
            let result = session.dispatch(&event, data).await;

            let Some(ack) = ack else {
                if let Err(e) = result {
                    debug!(
                        peer_id = %session.peer_id(),
                        event = %event,
                        error = %e,
                        "Request without ack failed"
                    );
                }
                return;
            };
            let reply = match result {
                Ok(data) => AckFrame::ok(ack, data),
                Err(e) => AckFrame::error(ack, e),
            };
            if frames.send(ServerFrame::Ack(reply)).await.is_err() {
                debug!(peer_id = %session.peer_id(), ack, "Ack dropped, connection closing");
            }
        });
    }

    // In-flight requests finish first so their results are torn down below
    tracker.close();
    tracker.wait().await;

    state.presence.unsubscribe(&connection_id);
    let left = state.sfu.leave(&peer_id);
    writer.abort();

    info!(connection_id = %connection_id, left_room = left, "Client disconnected");
}
