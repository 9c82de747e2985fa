//! Connection record, exclusively owned by the hub for its lifetime.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use gateway_common::{AuthContext, HubMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cursor::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Authorized,
    Active,
    Draining,
    Closed,
}

impl ConnectionState {
    /// The connection lifecycle: `new -> authorized -> active ->
    /// draining -> closed`, with `closed` reachable from any state.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Closed) => true,
            (New, Authorized) => true,
            (Authorized, Active) => true,
            (Active, Draining) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingAck {
    pub message: HubMessage,
    pub sent_at: DateTime<Utc>,
    pub replay_count: u32,
}

/// An outbound item queued for delivery to one connection's socket writer
/// task. The hub never awaits a socket write directly; it hands items
/// to this channel and the connection's own task drains it. `Close` lets
/// the hub (heartbeat timeout, maintenance transitions, fan-out failure)
/// terminate a socket with a specific WS close code without blocking on
/// the write itself.
#[derive(Debug, Clone)]
pub enum OutboundItem {
    Frame(serde_json::Value),
    Close { code: u16, reason: String },
}

pub type OutboundSender = mpsc::UnboundedSender<OutboundItem>;

pub struct Connection {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    pub auth: AuthContext,
    pub state: ConnectionState,
    /// channel string -> last cursor delivered on that channel.
    pub subscriptions: HashMap<String, Option<Cursor>>,
    pub last_heartbeat: Instant,
    pub pending_acks: HashMap<Uuid, PendingAck>,
    pub active_replays: u32,
    /// Set once a send failure or authorization revocation marks this
    /// connection for close; fan-out skips it without affecting others.
    pub marked_for_close: bool,
    pub outbound: OutboundSender,
}

impl Connection {
    pub fn new(id: String, auth: AuthContext, outbound: OutboundSender) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            auth,
            state: ConnectionState::New,
            subscriptions: HashMap::new(),
            last_heartbeat: Instant::now(),
            pending_acks: HashMap::new(),
            active_replays: 0,
            marked_for_close: false,
            outbound,
        }
    }

    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn send(&self, frame: serde_json::Value) -> bool {
        self.outbound.send(OutboundItem::Frame(frame)).is_ok()
    }

    /// Queues a close with a stable WS close code. The writer
    /// task sends the close frame and stops; other connections are
    /// unaffected.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.outbound.send(OutboundItem::Close { code, reason: reason.into() }).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_forbids_skipping_active() {
        assert!(ConnectionState::New.can_transition_to(ConnectionState::Authorized));
        assert!(!ConnectionState::New.can_transition_to(ConnectionState::Active));
        assert!(!ConnectionState::New.can_transition_to(ConnectionState::Draining));
    }

    #[test]
    fn any_state_can_close() {
        for s in [ConnectionState::New, ConnectionState::Authorized, ConnectionState::Active, ConnectionState::Draining] {
            assert!(s.can_transition_to(ConnectionState::Closed));
        }
    }
}
