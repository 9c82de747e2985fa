//! WebSocket upgrade handler and message framing. Parsing is
//! total: a frame that doesn't decode becomes a typed `error` reply
//! rather than a dropped connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use gateway_common::{AuthContext, Channel};
use gateway_hub::{Cursor, HubError, OutboundItem};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::server::AppState;

/// Client-supplied query params at upgrade time. `token` stands in for
/// whatever bearer-token auth middleware would normally resolve into an
/// `AuthContext` (out of scope here per the delivery-fabric boundary).
#[derive(Debug, Deserialize)]
pub struct WsUpgradeQuery {
    pub user_id: Option<String>,
    pub workspace_ids: Option<String>,
    pub admin: Option<bool>,
    /// URL-embedded initial subscription. Still re-authorized on connect -
    /// there is no bypass for this convenience path.
    pub subscribe: Option<String>,
}

/// `rename_all` retags variant names (`"subscribe"`, `"backfill"`, ...);
/// `rename_all_fields` additionally retags every struct-variant field to
/// camelCase, matching the wire grammar in spec section 4.10 (`fromCursor`,
/// `messageIds`) without renaming the idiomatic snake_case Rust fields.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Subscribe { channel: String, cursor: Option<String> },
    Unsubscribe { channel: String },
    Backfill { channel: String, from_cursor: Option<String>, limit: Option<usize> },
    Ping { timestamp: i64 },
    Reconnect { cursors: std::collections::HashMap<String, Option<String>> },
    Ack { message_ids: Vec<Uuid> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Connected {
        connection_id: String,
        server_time: chrono::DateTime<chrono::Utc>,
        server_version: &'static str,
        capabilities: &'static [&'static str],
        heartbeat_interval_ms: u64,
    },
    Subscribed {
        channel: String,
        missed_messages: Vec<gateway_common::HubMessage>,
        cursor: Option<String>,
        has_more: bool,
    },
    Unsubscribed { channel: String },
    BackfillResponse {
        channel: String,
        messages: Vec<gateway_common::HubMessage>,
        last_cursor: Option<String>,
        has_more: bool,
        cursor_expired: bool,
    },
    Pong { timestamp: i64, server_time: chrono::DateTime<chrono::Utc>, subscriptions: std::collections::HashMap<String, Option<String>> },
    ReconnectAck {
        replayed: std::collections::HashMap<String, usize>,
        expired: Vec<String>,
        new_cursors: std::collections::HashMap<String, Option<String>>,
    },
    AckResponse {
        #[serde(rename = "acknowledged")]
        acked: Vec<Uuid>,
        #[serde(rename = "notFound")]
        unknown: Vec<Uuid>,
    },
    Throttled { message: &'static str, resume_after_ms: u64, current_count: u32, limit: u32 },
    Error {
        code: String,
        message: String,
        channel: Option<String>,
        severity: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        alternative: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

/// Closed code -> hint table: a short, stable piece of guidance
/// a client can show a user or branch on, independent of the free-form
/// `message` string.
fn hint_for(code: &str) -> Option<&'static str> {
    Some(match code {
        "INVALID_FORMAT" => "resend a well-formed frame",
        "INVALID_CHANNEL" => "check the channel string grammar",
        "WS_SUBSCRIPTION_DENIED" => "this principal cannot access this channel",
        "WS_CURSOR_EXPIRED" => "resubscribe without a cursor",
        "WS_RATE_LIMITED" => "retry after resumeAfterMs",
        "AUTH_REQUIRED" => "reconnect with valid credentials",
        "SERIALIZATION_ERROR" => "the server could not encode this message",
        "INTERNAL_ERROR" => "retry; report if it persists",
        _ => return None,
    })
}

fn error_frame_for(err: &HubError, channel: Option<String>) -> ServerFrame {
    let code = err.code();
    ServerFrame::Error {
        code: code.to_string(),
        message: err.to_string(),
        channel,
        severity: err.severity(),
        hint: hint_for(code),
        alternative: None,
        details: None,
    }
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsUpgradeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = AuthContext {
        user_id: query.user_id.clone(),
        workspace_ids: query
            .workspace_ids
            .as_deref()
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
        is_admin: query.admin.unwrap_or(false),
    };
    let initial_subscribe = query.subscribe.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth, initial_subscribe))
}

/// Capabilities advertised in the `connected` frame. Clients use this to
/// gate features without guessing at a server version number.
const CAPABILITIES: &[&str] = &["cursor_replay", "reconnect", "ack", "throttling"];

#[instrument(skip(socket, state, auth))]
async fn handle_socket(socket: WebSocket, state: AppState, auth: AuthContext, initial_subscribe: Option<String>) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<OutboundItem>();

    state.hub.register_connection(connection_id.clone(), auth, outbound_tx);

    let send_task = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            match item {
                OutboundItem::Frame(value) => {
                    let text = serde_json::to_string(&value).unwrap_or_default();
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundItem::Close { code, reason } => {
                    let _ = sender.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                    break;
                }
            }
        }
    });

    let _ = send_frame(
        &state,
        &connection_id,
        &ServerFrame::Connected {
            connection_id: connection_id.clone(),
            server_time: chrono::Utc::now(),
            server_version: gateway_common::VERSION,
            capabilities: CAPABILITIES,
            heartbeat_interval_ms: state.heartbeat_interval_ms,
        },
    );

    if let Some(spec) = initial_subscribe {
        handle_subscribe(&state, &connection_id, spec, None).await;
    }

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Close(_) => break,
            Message::Text(text) => {
                gateway_hub::heartbeat::record_activity(&state.hub.connections_handle(), &connection_id);
                handle_text_frame(&state, &connection_id, &text).await;
            }
            Message::Ping(_) | Message::Pong(_) => {
                gateway_hub::heartbeat::record_activity(&state.hub.connections_handle(), &connection_id);
            }
            _ => {}
        }
    }

    send_task.abort();
    state.hub.remove_connection(&connection_id);
    info!(%connection_id, "websocket connection closed");
}

fn send_frame(state: &AppState, connection_id: &str, frame: &ServerFrame) -> bool {
    let connections = state.hub.connections_handle();
    let Some(conn) = connections.get(connection_id) else { return false };
    conn.send(serde_json::to_value(frame).unwrap_or(json!({})))
}

async fn handle_text_frame(state: &AppState, connection_id: &str, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed client frame");
            send_frame(
                state,
                connection_id,
                &ServerFrame::Error {
                    code: "INVALID_FORMAT".to_string(),
                    message: e.to_string(),
                    channel: None,
                    severity: "recoverable",
                    hint: hint_for("INVALID_FORMAT"),
                    alternative: None,
                    details: None,
                },
            );
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe { channel, cursor } => handle_subscribe(state, connection_id, channel, cursor).await,
        ClientFrame::Unsubscribe { channel } => handle_unsubscribe(state, connection_id, channel),
        ClientFrame::Backfill { channel, from_cursor, limit } => {
            handle_backfill(state, connection_id, channel, from_cursor, limit.unwrap_or(100)).await
        }
        ClientFrame::Ping { timestamp } => handle_ping(state, connection_id, timestamp),
        ClientFrame::Reconnect { cursors } => handle_reconnect(state, connection_id, cursors).await,
        ClientFrame::Ack { message_ids } => handle_ack(state, connection_id, message_ids),
    }
}

/// A cursor string that is `Some` but doesn't decode is a client bug, not
/// the same thing as "no cursor supplied" - the former must surface as an
/// error rather than silently replaying from the start of the buffer.
fn decode_cursor(cursor_str: Option<&str>) -> Result<Option<Cursor>, ()> {
    match cursor_str {
        None => Ok(None),
        Some(s) => Cursor::decode(s).map(Some).ok_or(()),
    }
}

fn invalid_channel_frame(channel_str: String, e: impl std::fmt::Display) -> ServerFrame {
    ServerFrame::Error {
        code: "INVALID_CHANNEL".to_string(),
        message: e.to_string(),
        channel: Some(channel_str),
        severity: "recoverable",
        hint: hint_for("INVALID_CHANNEL"),
        alternative: None,
        details: None,
    }
}

fn invalid_cursor_frame(channel_str: String) -> ServerFrame {
    ServerFrame::Error {
        code: "INVALID_FORMAT".to_string(),
        message: "cursor is not a well-formed opaque cursor".to_string(),
        channel: Some(channel_str),
        severity: "recoverable",
        hint: hint_for("INVALID_FORMAT"),
        alternative: Some("resubscribe without a cursor to start from the current tail"),
        details: None,
    }
}

async fn handle_subscribe(state: &AppState, connection_id: &str, channel_str: String, cursor_str: Option<String>) {
    let channel = match Channel::parse(&channel_str) {
        Ok(c) => c,
        Err(e) => {
            send_frame(state, connection_id, &invalid_channel_frame(channel_str, e));
            return;
        }
    };
    let cursor = match decode_cursor(cursor_str.as_deref()) {
        Ok(c) => c,
        Err(()) => {
            send_frame(state, connection_id, &invalid_cursor_frame(channel_str));
            return;
        }
    };

    match state.hub.subscribe(connection_id, &channel, cursor, 100).await {
        Ok(outcome) => {
            send_frame(
                state,
                connection_id,
                &ServerFrame::Subscribed {
                    channel: channel_str,
                    cursor: outcome.messages.last().map(|m| m.cursor.clone()),
                    has_more: outcome.has_more,
                    missed_messages: outcome.messages,
                },
            );
        }
        Err(HubError::Throttled { resume_after_ms, current_count, limit }) => {
            send_frame(
                state,
                connection_id,
                &ServerFrame::Throttled { message: "too many concurrent replays", resume_after_ms, current_count, limit },
            );
        }
        Err(e) => {
            send_frame(state, connection_id, &error_frame_for(&e, Some(channel_str)));
        }
    }
}

fn handle_unsubscribe(state: &AppState, connection_id: &str, channel_str: String) {
    if let Ok(channel) = Channel::parse(&channel_str) {
        state.hub.unsubscribe(connection_id, &channel);
    }
    send_frame(state, connection_id, &ServerFrame::Unsubscribed { channel: channel_str });
}

async fn handle_backfill(state: &AppState, connection_id: &str, channel_str: String, from_cursor: Option<String>, limit: usize) {
    let channel = match Channel::parse(&channel_str) {
        Ok(c) => c,
        Err(e) => {
            send_frame(state, connection_id, &invalid_channel_frame(channel_str, e));
            return;
        }
    };
    let cursor = match decode_cursor(from_cursor.as_deref()) {
        Ok(c) => c,
        Err(()) => {
            send_frame(state, connection_id, &invalid_cursor_frame(channel_str));
            return;
        }
    };
    match state.hub.subscribe(connection_id, &channel, cursor, limit).await {
        Ok(outcome) => {
            send_frame(
                state,
                connection_id,
                &ServerFrame::BackfillResponse {
                    channel: channel_str,
                    last_cursor: outcome.messages.last().map(|m| m.cursor.clone()),
                    cursor_expired: outcome.cursor_expired_fallback,
                    has_more: outcome.has_more,
                    messages: outcome.messages,
                },
            );
        }
        Err(e) => send_frame(state, connection_id, &error_frame_for(&e, Some(channel_str))),
    }
}

fn handle_ping(state: &AppState, connection_id: &str, timestamp: i64) {
    let subscriptions = state
        .hub
        .subscriptions_for_reconnect(connection_id)
        .into_iter()
        .map(|(channel, cursor)| (channel, cursor.map(|c| c.encode())))
        .collect();
    send_frame(state, connection_id, &ServerFrame::Pong { timestamp, server_time: chrono::Utc::now(), subscriptions });
}

#[instrument(skip(state, cursors))]
async fn handle_reconnect(state: &AppState, connection_id: &str, cursors: std::collections::HashMap<String, Option<String>>) {
    let mut replayed = std::collections::HashMap::new();
    let mut expired = Vec::new();
    let mut new_cursors = std::collections::HashMap::new();

    for (channel_str, cursor_str) in cursors {
        let Ok(channel) = Channel::parse(&channel_str) else {
            expired.push(channel_str);
            continue;
        };
        let cursor = match decode_cursor(cursor_str.as_deref()) {
            Ok(c) => c,
            Err(()) => {
                expired.push(channel_str);
                continue;
            }
        };
        match state.hub.subscribe(connection_id, &channel, cursor, 100).await {
            Ok(outcome) => {
                new_cursors.insert(channel_str.clone(), outcome.messages.last().map(|m| m.cursor.clone()));
                replayed.insert(channel_str.clone(), outcome.messages.len());
                if outcome.cursor_expired_fallback {
                    expired.push(channel_str);
                }
            }
            Err(_) => expired.push(channel_str),
        }
    }

    send_frame(state, connection_id, &ServerFrame::ReconnectAck { replayed, expired, new_cursors });
}

fn handle_ack(state: &AppState, connection_id: &str, message_ids: Vec<Uuid>) {
    let mut acked = Vec::new();
    let mut unknown = Vec::new();
    for id in message_ids {
        if state.hub.ack(connection_id, id) {
            acked.push(id);
        } else {
            unknown.push(id);
        }
    }
    send_frame(state, connection_id, &ServerFrame::AckResponse { acked, unknown });
}
