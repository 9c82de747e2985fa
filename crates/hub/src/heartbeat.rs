//! Server-initiated liveness probes. Runs as one background task
//! per hub instance; does not own per-connection sockets, only reads the
//! connection registry and writes `heartbeat` frames + evicts the stale.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;

use crate::connection::Connection;

/// Stable close code for heartbeat-timeout evictions: the 1011 family,
/// not 1012/1013, which are reserved for lifecycle transitions.
pub const CLOSE_CODE_STALE: u16 = 1011;

/// Sweeps `connections` on a fixed interval: any connection whose last
/// observed activity (a received client frame, ping/pong, or message ack)
/// exceeds `timeout` is marked for close; every other connection receives
/// a `heartbeat` frame carrying its current subscriptions and cursors.
pub fn spawn_heartbeat_task(
    connections: Arc<DashMap<String, Connection>>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweep_once(&connections, timeout);
        }
    })
}

fn sweep_once(connections: &DashMap<String, Connection>, timeout: Duration) {
    let mut stale = Vec::new();

    for mut entry in connections.iter_mut() {
        let conn = entry.value_mut();
        if conn.last_heartbeat.elapsed() >= timeout {
            conn.marked_for_close = true;
            let _ = conn.close(CLOSE_CODE_STALE, "heartbeat_timeout");
            stale.push(conn.id.clone());
            continue;
        }

        let frame = json!({
            "type": "heartbeat",
            "serverTime": chrono::Utc::now(),
        });
        let _ = conn.send(frame);
    }

    for id in stale {
        tracing::info!(connection_id = %id, "connection exceeded heartbeat timeout, marked for close");
    }
}

/// Resets a connection's liveness clock. Called on receipt of ANY valid
/// client frame, not just `ping`.
pub fn record_activity(connections: &DashMap<String, Connection>, connection_id: &str) {
    if let Some(mut conn) = connections.get_mut(connection_id) {
        conn.touch_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::AuthContext;
    use tokio::sync::mpsc;

    fn new_connection(id: &str) -> Connection {
        let (tx, _rx) = mpsc::unbounded_channel();
        Connection::new(id.to_string(), AuthContext::unauthenticated(), tx)
    }

    #[test]
    fn stale_connection_marked_for_close() {
        let connections: DashMap<String, Connection> = DashMap::new();
        let mut conn = new_connection("c1");
        conn.last_heartbeat = std::time::Instant::now() - Duration::from_secs(1000);
        connections.insert("c1".to_string(), conn);

        sweep_once(&connections, Duration::from_secs(75));
        assert!(connections.get("c1").unwrap().marked_for_close);
    }

    #[test]
    fn fresh_connection_receives_heartbeat_and_is_not_closed() {
        let connections: DashMap<String, Connection> = DashMap::new();
        connections.insert("c1".to_string(), new_connection("c1"));

        sweep_once(&connections, Duration::from_secs(75));
        assert!(!connections.get("c1").unwrap().marked_for_close);
    }

    #[test]
    fn record_activity_resets_clock() {
        let connections: DashMap<String, Connection> = DashMap::new();
        let mut conn = new_connection("c1");
        conn.last_heartbeat = std::time::Instant::now() - Duration::from_secs(1000);
        connections.insert("c1".to_string(), conn);

        record_activity(&connections, "c1");
        sweep_once(&connections, Duration::from_secs(75));
        assert!(!connections.get("c1").unwrap().marked_for_close);
    }
}
