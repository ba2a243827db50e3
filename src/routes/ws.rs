//! Real-time ride updates over a WebSocket.
//!
//! The bearer token travels in the `token` query parameter since browsers
//! cannot set headers on upgrade requests. One writer task per socket drains
//! the connection's channel; the read loop answers pings and reports
//! malformed input.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::{debug, warn};

use crate::{
    auth,
    models::user::User,
    services::notifier::{Connection, ServerEvent},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/ride-updates", get(ride_updates))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    #[serde(other)]
    Unknown,
}

async fn ride_updates(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    let user = match params.token.as_deref() {
        Some(token) => match auth::user_from_token(&state, token).await {
            Ok(user) => user,
            Err(err) => {
                warn!("websocket auth lookup failed: {err}");
                None
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| async move {
        match user {
            Some(user) => run_session(socket, state, user).await,
            None => reject(socket).await,
        }
    })
}

async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "invalid or missing token".into(),
    };
    if let Err(err) = socket.send(Message::Close(Some(frame))).await {
        debug!("could not send policy close: {err}");
    }
}

async fn run_session(socket: WebSocket, state: AppState, user: User) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbox) = Connection::channel();
    let reply = connection.downgrade();
    let connection_id = state.registry.connect(&user.id, connection).await;

    send_reply(
        &reply,
        &ServerEvent::Connected {
            message: format!("Connected as {}", user.username),
        },
    );

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(answer) = answer_client(&text) {
                        send_reply(&reply, &answer);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(user_id = %user.id, "websocket read failed: {err}");
                    break;
                }
            },
        }
    }

    state.registry.disconnect(&user.id, connection_id).await;
    writer.abort();
    debug!(user_id = %user.id, connection = %connection_id, "websocket closed");
}

/// Response to one client text frame, if it warrants one.
fn answer_client(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Err(_) => Some(ServerEvent::Error {
            message: "Invalid JSON format".into(),
        }),
        Ok(value) => match serde_json::from_value::<ClientMessage>(value) {
            Ok(ClientMessage::Ping) => Some(ServerEvent::Pong),
            Ok(ClientMessage::Unknown) | Err(_) => None,
        },
    }
}

fn send_reply(reply: &WeakUnboundedSender<String>, event: &ServerEvent) {
    let (Some(tx), Some(text)) = (reply.upgrade(), event.to_json()) else {
        return;
    };
    let _ = tx.send(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_gets_pong() {
        assert!(matches!(
            answer_client(r#"{"type":"ping"}"#),
            Some(ServerEvent::Pong)
        ));
    }

    #[test]
    fn garbage_gets_an_error() {
        assert!(matches!(
            answer_client("not json"),
            Some(ServerEvent::Error { .. })
        ));
    }

    #[test]
    fn other_messages_are_ignored() {
        assert!(answer_client(r#"{"type":"subscribe"}"#).is_none());
        assert!(answer_client(r#"{"hello":1}"#).is_none());
    }
}
