//! The core pub/sub hub: connection registry, subscription index,
//! publish/subscribe/replay/reconnect/ack, wired to the ring buffer,
//! authorization, durable event log, heartbeat and maintenance.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use gateway_common::{
    AgentAccessResolver, AuthContext, Channel, GatewayConfig, HubMessage, MessageMetadata, MessageType,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::authorization::{authorize, AuthDecision, Intent};
use crate::connection::{Connection, ConnectionState, OutboundSender, PendingAck};
use crate::cursor::Cursor;
use crate::error::HubError;
use crate::event_log::DurableEventLog;
use crate::maintenance::MaintenanceCoordinator;
use crate::ring_buffer::RingBuffer;

/// Result of a successful `subscribe` call: the replay batch the client
/// should receive immediately, plus whether it came from the durable tier.
pub struct SubscribeOutcome {
    pub messages: Vec<HubMessage>,
    pub has_more: bool,
    pub cursor_expired_fallback: bool,
}

pub struct Hub {
    config: GatewayConfig,
    connections: Arc<DashMap<String, Connection>>,
    /// channel string -> set of subscribed connection ids.
    subscriptions: DashMap<String, Vec<String>>,
    buffers: DashMap<String, Arc<Mutex<RingBuffer>>>,
    event_log: Arc<dyn DurableEventLog>,
    resolver: Arc<dyn AgentAccessResolver>,
    pub maintenance: MaintenanceCoordinator,
}

impl Hub {
    pub fn new(config: GatewayConfig, event_log: Arc<dyn DurableEventLog>, resolver: Arc<dyn AgentAccessResolver>) -> Self {
        Self {
            config,
            connections: Arc::new(DashMap::new()),
            subscriptions: DashMap::new(),
            buffers: DashMap::new(),
            event_log,
            resolver,
            maintenance: MaintenanceCoordinator::new(),
        }
    }

    pub fn connections_handle(&self) -> Arc<DashMap<String, Connection>> {
        Arc::clone(&self.connections)
    }

    pub fn register_connection(&self, id: String, auth: AuthContext, outbound: OutboundSender) {
        let mut conn = Connection::new(id.clone(), auth, outbound);
        conn.transition(ConnectionState::Authorized);
        conn.transition(ConnectionState::Active);
        self.connections.insert(id, conn);
    }

    pub fn remove_connection(&self, connection_id: &str) {
        if let Some((_, conn)) = self.connections.remove(connection_id) {
            for channel in conn.subscriptions.keys() {
                if let Some(mut subs) = self.subscriptions.get_mut(channel) {
                    subs.retain(|id| id != connection_id);
                }
            }
        }
    }

    fn buffer_for(&self, channel: &Channel) -> Arc<Mutex<RingBuffer>> {
        let key = channel.capacity_prefix();
        if let Some(existing) = self.buffers.get(&key) {
            return Arc::clone(&existing);
        }
        let capacity = self.config.ring_buffer.capacity_for(&key);
        let buffer = Arc::new(Mutex::new(RingBuffer::new(capacity)));
        self.buffers.entry(key).or_insert_with(|| Arc::clone(&buffer));
        buffer
    }

    /// Appends to the channel's ring buffer and fans out to every
    /// subscriber via their non-blocking outbound sender - never awaits on
    /// any single slow subscriber. Mirrors to the durable event log in a
    /// detached task so publish latency never depends on it.
    #[tracing::instrument(skip(self, payload, metadata), fields(channel = %channel))]
    pub async fn publish(
        &self,
        channel: &Channel,
        message_type: MessageType,
        payload: serde_json::Value,
        metadata: Option<MessageMetadata>,
    ) -> HubMessage {
        let channel_str = channel.to_string();
        let message = HubMessage {
            id: Uuid::new_v4(),
            cursor: String::new(),
            timestamp: chrono::Utc::now(),
            channel: channel_str.clone(),
            message_type,
            payload,
            metadata,
        };

        let buffer = self.buffer_for(channel);
        let stored = {
            let mut guard = buffer.lock().await;
            let mut stored = message.clone();
            let cursor = guard.append(message);
            stored.cursor = cursor.encode();
            stored
        };

        if let Some(subs) = self.subscriptions.get(&channel_str) {
            for connection_id in subs.iter() {
                self.deliver(connection_id, &stored);
            }
        }

        let event_log = Arc::clone(&self.event_log);
        let for_log = stored.clone();
        let channel_for_log = channel_str.clone();
        tokio::spawn(async move {
            if let Err(e) = event_log.append(&channel_for_log, &for_log).await {
                tracing::warn!(error = %e, channel = %channel_for_log, "event log append failed; ring buffer remains authoritative short-term");
            }
        });

        stored
    }

    /// Fans a single message out to one subscriber. Suspended entirely
    /// (no frame sent, no `pending_acks` growth) once the connection's
    /// pending-ack set has reached its configured cap - the ring buffer
    /// append already happened in `publish` and is unaffected, so the
    /// connection can always recover via the durable tier once it catches
    /// up on acks or reconnects.
    fn deliver(&self, connection_id: &str, message: &HubMessage) {
        let Some(mut conn) = self.connections.get_mut(connection_id) else { return };
        if conn.marked_for_close {
            return;
        }
        if conn.pending_acks.len() >= self.config.hub.max_pending_acks_per_connection {
            tracing::warn!(connection_id, pending = conn.pending_acks.len(), "pending-ack cap reached; suspending fan-out to slow client");
            return;
        }
        conn.subscriptions.insert(message.channel.clone(), Cursor::decode(&message.cursor));

        if message.requires_ack() {
            conn.pending_acks.insert(
                message.id,
                PendingAck { message: message.clone(), sent_at: chrono::Utc::now(), replay_count: 0 },
            );
        }

        let frame = serde_json::json!({ "type": "message", "message": message, "ackRequired": message.requires_ack() });
        if !conn.send(frame) {
            conn.marked_for_close = true;
        }
    }

    /// Subscribes `connection_id` to `channel`, re-running authorization
    /// even for URL-embedded subscriptions registered at upgrade - there is
    /// no bypass. Replays from the requested cursor: ring buffer first,
    /// falling back to the durable tier when the ring buffer reports the
    /// cursor expired. `activeReplays` is only consumed when the request
    /// actually falls through to the durable tier - a plain ring-buffer
    /// subscribe never touches the replay-throttle budget.
    #[tracing::instrument(skip(self), fields(connection_id, channel = %channel))]
    pub async fn subscribe(
        &self,
        connection_id: &str,
        channel: &Channel,
        from: Option<Cursor>,
        limit: usize,
    ) -> Result<SubscribeOutcome, HubError> {
        let (auth, state) = {
            let conn = self.connections.get(connection_id).ok_or_else(|| HubError::ConnectionNotFound(connection_id.to_string()))?;
            (conn.auth.clone(), conn.state)
        };

        if state == ConnectionState::Draining {
            return Err(HubError::SubscriptionDenied { reason: "connection is draining; new subscriptions are refused".to_string() });
        }

        match authorize(&auth, channel, Intent::Subscribe, self.resolver.as_ref()).await {
            AuthDecision::Allowed => {}
            AuthDecision::Denied { reason } => return Err(HubError::SubscriptionDenied { reason }),
        }

        let channel_str = channel.to_string();
        let buffer = self.buffer_for(channel);
        let ring_result = {
            let guard = buffer.lock().await;
            guard.range(from, limit)
        };

        let outcome = if ring_result.expired && from.is_some() {
            {
                let active_replays = self.connections.get(connection_id).map(|c| c.active_replays).unwrap_or(0);
                if active_replays >= self.config.hub.max_concurrent_replays_per_connection as u32 {
                    return Err(HubError::Throttled {
                        resume_after_ms: self.config.hub.replay_throttle_resume_after_ms,
                        current_count: active_replays,
                        limit: self.config.hub.max_concurrent_replays_per_connection as u32,
                    });
                }
            }
            if let Some(mut conn) = self.connections.get_mut(connection_id) {
                conn.active_replays += 1;
            }

            let durable = self.event_log.replay(&channel_str, from, limit).await;
            if let Some(mut conn) = self.connections.get_mut(connection_id) {
                conn.active_replays = conn.active_replays.saturating_sub(1);
            }
            let durable = durable?;
            SubscribeOutcome { messages: durable.messages, has_more: durable.has_more, cursor_expired_fallback: durable.cursor_expired }
        } else {
            SubscribeOutcome { messages: ring_result.messages, has_more: ring_result.has_more, cursor_expired_fallback: false }
        };

        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.subscriptions.entry(channel_str.clone()).or_insert(from);
            if let Some(last) = outcome.messages.last() {
                conn.subscriptions.insert(channel_str.clone(), Cursor::decode(&last.cursor));
            }
        }
        self.subscriptions.entry(channel_str).or_default().push(connection_id.to_string());

        Ok(outcome)
    }

    pub fn unsubscribe(&self, connection_id: &str, channel: &Channel) {
        let channel_str = channel.to_string();
        if let Some(mut subs) = self.subscriptions.get_mut(&channel_str) {
            subs.retain(|id| id != connection_id);
        }
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.subscriptions.remove(&channel_str);
        }
    }

    /// Acknowledges delivery of a message requiring ack, clearing it from
    /// the connection's pending set.
    #[tracing::instrument(skip(self))]
    pub fn ack(&self, connection_id: &str, message_id: Uuid) -> bool {
        self.connections
            .get_mut(connection_id)
            .map(|mut conn| conn.pending_acks.remove(&message_id).is_some())
            .unwrap_or(false)
    }

    /// Returns the subscriptions (channel -> last delivered cursor) a
    /// reconnecting client should resubscribe to, so the caller can
    /// re-run `subscribe` for each at the client-supplied or
    /// last-known cursor.
    pub fn subscriptions_for_reconnect(&self, connection_id: &str) -> HashMap<String, Option<Cursor>> {
        self.connections.get(connection_id).map(|c| c.subscriptions.clone()).unwrap_or_default()
    }

    /// Enters maintenance mode: publishes `maintenance.state_changed`
    /// through the normal ring-buffer path, then force-closes every
    /// connection with `CLOSE_CODE_MAINTENANCE`. By the time this returns,
    /// no connection remains active.
    pub async fn enter_maintenance(&self, reason: Option<&str>) -> HubMessage {
        let payload = self.maintenance.enter_maintenance_payload(reason);
        let channel = Channel::system("maintenance");
        let message = self.publish(&channel, MessageType::MaintenanceStateChanged, payload, None).await;
        crate::maintenance::MaintenanceCoordinator::close_all(
            &self.connections,
            crate::maintenance::CLOSE_CODE_MAINTENANCE,
            "maintenance",
        );
        message
    }

    /// Starts draining: publishes the transition, moves every
    /// connection's state machine to `Draining`, then force-closes every
    /// connection with `CLOSE_CODE_DRAINING`. New connections made after
    /// this call are the upgrade layer's responsibility to reject.
    pub async fn start_draining(&self, deadline_seconds: Option<u64>, reason: Option<&str>) -> HubMessage {
        let payload = self.maintenance.start_draining_payload(deadline_seconds, reason);
        let channel = Channel::system("maintenance");
        let message = self.publish(&channel, MessageType::MaintenanceStateChanged, payload, None).await;
        for mut entry in self.connections.iter_mut() {
            entry.value_mut().transition(ConnectionState::Draining);
        }
        crate::maintenance::MaintenanceCoordinator::close_all(
            &self.connections,
            crate::maintenance::CLOSE_CODE_DRAINING,
            "draining",
        );
        message
    }

    /// Exits maintenance mode, returning to `running`. Existing
    /// connections (there should be none, since entering maintenance
    /// force-closed them) are left alone; new connections are accepted
    /// again at the upgrade layer once this returns.
    pub async fn exit_maintenance(&self) -> HubMessage {
        let payload = self.maintenance.exit_maintenance_payload();
        let channel = Channel::system("maintenance");
        self.publish(&channel, MessageType::MaintenanceStateChanged, payload, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::NullEventLog;
    use gateway_common::NoAgentAccess;
    use tokio::sync::mpsc;

    fn hub() -> Hub {
        let mut config = GatewayConfig::default();
        config.event_log.enabled = false;
        Hub::new(config, Arc::new(NullEventLog), Arc::new(NoAgentAccess))
    }

    fn admin_auth() -> AuthContext {
        AuthContext { user_id: Some("u1".to_string()), workspace_ids: vec![], is_admin: true }
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers_to_subscriber() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), admin_auth(), tx);

        let channel = Channel::parse("system:health").unwrap();
        hub.subscribe("c1", &channel, None, 10).await.unwrap();
        hub.publish(&channel, MessageType::SystemHealthOk, serde_json::json!({}), None).await;

        let item = rx.recv().await.unwrap();
        match item {
            crate::connection::OutboundItem::Frame(frame) => assert_eq!(frame["type"], "message"),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_denied_for_unauthenticated() {
        let hub = hub();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), AuthContext::unauthenticated(), tx);
        let channel = Channel::parse("agent:output:a1").unwrap();
        let result = hub.subscribe("c1", &channel, None, 10).await;
        assert!(matches!(result, Err(HubError::SubscriptionDenied { .. })));
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), admin_auth(), tx);
        let channel = Channel::parse("system:health").unwrap();
        hub.subscribe("c1", &channel, None, 10).await.unwrap();
        hub.unsubscribe("c1", &channel);
        hub.publish(&channel, MessageType::SystemHealthOk, serde_json::json!({}), None).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ack_clears_pending_ack_entry() {
        let hub = hub();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), admin_auth(), tx);
        let channel = Channel::parse("workspace:conflicts:w1").unwrap();
        hub.subscribe("c1", &channel, None, 10).await.unwrap();
        let message = hub.publish(&channel, MessageType::ConflictOpened, serde_json::json!({}), None).await;
        assert!(hub.ack("c1", message.id));
        assert!(!hub.ack("c1", message.id));
    }

    #[tokio::test]
    async fn replay_throttle_rejects_beyond_configured_concurrency_when_falling_through_to_durable_tier() {
        let hub = hub();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), admin_auth(), tx);
        let channel = Channel::parse("system:health").unwrap();

        // system:health has a capacity of 16; publish past it so the first
        // cursor we ever handed out is now expired relative to the buffer.
        let first = hub.publish(&channel, MessageType::SystemHealthOk, serde_json::json!({}), None).await;
        for _ in 0..20 {
            hub.publish(&channel, MessageType::SystemHealthOk, serde_json::json!({}), None).await;
        }
        let expired_cursor = Cursor::decode(&first.cursor).unwrap();

        if let Some(mut conn) = hub.connections.get_mut("c1") {
            conn.active_replays = hub.config.hub.max_concurrent_replays_per_connection as u32;
        }
        let result = hub.subscribe("c1", &channel, Some(expired_cursor), 10).await;
        assert!(matches!(result, Err(HubError::Throttled { .. })));
    }

    #[tokio::test]
    async fn plain_ring_buffer_subscribe_never_consumes_replay_throttle_budget() {
        let hub = hub();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), admin_auth(), tx);
        let channel = Channel::parse("system:health").unwrap();
        hub.publish(&channel, MessageType::SystemHealthOk, serde_json::json!({}), None).await;

        // None of these calls fall through to the durable tier (no cursor,
        // never expired), so every one of them should succeed even though
        // there are more than `max_concurrent_replays_per_connection` of them.
        let limit = hub.config.hub.max_concurrent_replays_per_connection + 3;
        for _ in 0..limit {
            hub.subscribe("c1", &channel, None, 10).await.unwrap();
        }
        assert_eq!(hub.connections.get("c1").unwrap().active_replays, 0);
    }

    #[tokio::test]
    async fn subscribe_denied_while_connection_is_draining() {
        let hub = hub();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), admin_auth(), tx);
        if let Some(mut conn) = hub.connections.get_mut("c1") {
            conn.transition(ConnectionState::Draining);
        }
        let channel = Channel::parse("system:health").unwrap();
        let result = hub.subscribe("c1", &channel, None, 10).await;
        assert!(matches!(result, Err(HubError::SubscriptionDenied { .. })));
    }

    #[tokio::test]
    async fn fan_out_suspends_once_pending_ack_cap_is_reached() {
        let mut config = GatewayConfig::default();
        config.event_log.enabled = false;
        config.hub.max_pending_acks_per_connection = 2;
        let hub = Hub::new(config, Arc::new(NullEventLog), Arc::new(NoAgentAccess));
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register_connection("c1".to_string(), admin_auth(), tx);
        let channel = Channel::parse("workspace:conflicts:w1").unwrap();
        hub.subscribe("c1", &channel, None, 10).await.unwrap();

        // ConflictOpened requires ack; publish one more than the cap.
        for _ in 0..3 {
            hub.publish(&channel, MessageType::ConflictOpened, serde_json::json!({}), None).await;
        }

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 2, "fan-out should stop once pending_acks reaches the cap");
        assert_eq!(hub.connections.get("c1").unwrap().pending_acks.len(), 2);
    }
}
