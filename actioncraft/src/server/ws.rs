//! WebSocket frame protocol (spec §4.3 "WebSocket frame protocol").

use crate::action::dispatch::{act, ensure_session, DispatchContext};
use crate::connection::Connection;
use crate::error::{ActionError, ErrorKind};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
enum Frame {
    Action {
        action: String,
        #[serde(rename = "messageId")]
        message_id: Option<String>,
        #[serde(default)]
        params: Value,
    },
    Subscribe {
        channel: String,
        #[serde(rename = "messageId")]
        message_id: Option<String>,
    },
    Unsubscribe {
        channel: String,
        #[serde(rename = "messageId")]
        message_id: Option<String>,
    },
}

/// Drive one WebSocket connection end-to-end: dispatch inbound frames,
/// forward pub/sub broadcasts, and clean up presence/registry state on
/// close (spec §3 Connection destruction invariant, §4.3, §4.4).
pub async fn handle_socket(socket: WebSocket, state: AppState, mut connection: Connection) {
    state.connections.insert(connection.clone());
    let mut outbound = state.outbound.register(connection.id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => {
                        let reply = handle_frame(&state, &mut connection, &text).await;
                        state.connections.insert(connection.clone());
                        if sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            message = outbound.recv() => {
                let Some(message) = message else { continue };
                if sender.send(Message::Text(message.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.outbound.unregister(connection.id);
    state.connections.remove(connection.transport, &connection.peer_identifier, connection.id);
    for (channel, key) in state.channels.presence.drop_connection(connection.id) {
        let payload = json!({ "event": "leave", "presenceKey": key });
        if let Err(err) =
            crate::pubsub::broadcast(&state.redis, &state.config.process.name, &channel, payload, "presence").await
        {
            warn!(error = %err, channel = %channel, "failed to broadcast presence leave on disconnect");
        }
    }
}

async fn handle_frame(state: &AppState, connection: &mut Connection, text: &str) -> Value {
    let frame = match serde_json::from_str::<Frame>(text) {
        Ok(frame) => frame,
        Err(_) => {
            return error_frame(None, &ActionError::new(ErrorKind::ConnectionTypeNotFound, "unknown or malformed message"));
        }
    };

    match frame {
        Frame::Action { action, message_id, params } => {
            let mut ctx = DispatchContext {
                state: state.clone(),
                connection: connection.clone(),
            };
            let result = act(&mut ctx, &action, params).await;
            *connection = ctx.connection;
            match result {
                Ok(response) => json!({ "messageId": message_id, "response": response }),
                Err(err) => error_frame(message_id.as_deref(), &err),
            }
        }
        Frame::Subscribe { channel, message_id } => {
            if let Err(err) = ensure_session(state, connection).await {
                return error_frame(message_id.as_deref(), &err);
            }
            match state
                .channels
                .subscribe(&state.redis, &state.config.process.name, state.config.presence.ttl_secs, connection, &channel)
                .await
            {
                Ok(()) => json!({ "messageId": message_id, "subscribed": { "channel": channel } }),
                Err(err) => error_frame(message_id.as_deref(), &err),
            }
        }
        Frame::Unsubscribe { channel, message_id } => {
            if let Err(err) = ensure_session(state, connection).await {
                return error_frame(message_id.as_deref(), &err);
            }
            state.channels.unsubscribe(&state.redis, &state.config.process.name, connection, &channel).await;
            json!({ "messageId": message_id, "unsubscribed": { "channel": channel } })
        }
    }
}

fn error_frame(message_id: Option<&str>, err: &ActionError) -> Value {
    debug!(kind = ?err.kind, "websocket frame error");
    let mut body = err.to_envelope(false);
    if let Some(id) = message_id {
        body["messageId"] = json!(id);
    }
    body
}
