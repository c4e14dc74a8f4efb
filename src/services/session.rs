// src/services/session.rs

//! # Connection Session
//!
//! Runs one registered connection: a send pump that drains the node's mailbox
//! onto the socket, and a receive pump that feeds inbound frames to the local
//! dispatcher and the bridge. When either pump stops, the other is cancelled,
//! the node is deregistered and its mailbox is dropped.

use std::{fmt::Display, sync::Arc};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{sink::SinkExt, stream::StreamExt, Sink, Stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::{
    api::state::AppState,
    models::{GroupId, UserId},
    services::{
        connection_manager::Node,
        dispatcher::{DispatchOutcome, Origin},
    },
};

/// Serves an upgraded WebSocket until it fails, idles out, is replaced or the
/// server shuts down.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId, groups: Vec<GroupId>) {
    let (ws_sender, ws_receiver) = socket.split();
    serve_connection(ws_sender, ws_receiver, state, user_id, groups).await;
}

/// Transport-independent body of [`run_connection`].
pub async fn serve_connection<Si, St, E>(
    sink: Si,
    stream: St,
    state: AppState,
    user_id: UserId,
    groups: Vec<GroupId>,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let cancel = state.shutdown.child_token();
    let (node, mailbox) = Node::new(user_id, groups, state.config.mailbox_capacity, cancel.clone());
    info!(user_id, node = %node.id(), groups = ?node.groups(), "New chat connection established");

    state.connection_manager.register(Arc::clone(&node)).await;

    let send_task = tokio::spawn(send_pump(sink, mailbox, cancel.clone(), user_id));
    receive_pump(stream, &state, &cancel, user_id).await;

    cancel.cancel();
    if let Err(e) = send_task.await {
        warn!(user_id, "Send pump task failed: {}", e);
    }

    state.connection_manager.deregister(user_id, node.id()).await;
    info!(user_id, node = %node.id(), "Chat connection finished");
}

/// Writes queued payloads to the socket until a write fails, the mailbox
/// closes or `cancel` fires. On cancellation a close frame is sent.
pub async fn send_pump<S>(
    mut sink: S,
    mut mailbox: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    user_id: UserId,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            payload = mailbox.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = sink.send(outbound_frame(payload)).await {
                        warn!(user_id, "Could not write to client: {}", e);
                        break;
                    }
                }
                None => break,
            },
        }
    }
    cancel.cancel();
    info!(user_id, "Send pump stopped");
}

/// Reads frames until the peer closes, a read fails, the idle timeout elapses
/// or `cancel` fires.
pub async fn receive_pump<S, E>(
    mut stream: S,
    state: &AppState,
    cancel: &CancellationToken,
    user_id: UserId,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let idle_timeout = state.config.idle_timeout;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        let payload = match next {
            Err(_) => {
                info!(user_id, "No traffic for {:?}, closing connection", idle_timeout);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(user_id, "WebSocket read error: {}", e);
                break;
            }
            Ok(Some(Ok(msg))) => match msg {
                Message::Text(text) => Bytes::from(text),
                Message::Binary(data) => Bytes::from(data),
                Message::Close(c) => {
                    info!(user_id, "Client closed connection: {:?}", c);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            },
        };

        relay_inbound(state, payload, user_id).await;
    }
    cancel.cancel();
    info!(user_id, "Receive pump stopped");
}

/// Hands one inbound payload to the bridge and to this instance's dispatcher.
pub async fn relay_inbound(state: &AppState, payload: Bytes, user_id: UserId) -> DispatchOutcome {
    trace!(user_id, "[ws]<= {}", String::from_utf8_lossy(&payload));

    if let Some(bridge) = &state.bridge {
        if let Err(e) = bridge.publish(&payload).await {
            warn!(user_id, len = payload.len(), "Message not bridged to other instances: {}", e);
        }
    }

    state.dispatcher.dispatch(payload, Origin::Local).await
}

fn outbound_frame(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}
