//! Maintenance coordinator: running/maintenance/draining lifecycle
//! for the whole gateway process, distinct from a single connection's
//! `ConnectionState`. Builds the payload for `system:maintenance`; the
//! hub is responsible for actually publishing it (through the normal
//! ring-buffer path, so the transition is replayable like any other
//! message) before closing sockets.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;

use crate::connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MaintenanceState {
    Running = 0,
    Maintenance = 1,
    Draining = 2,
}

impl MaintenanceState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MaintenanceState::Maintenance,
            2 => MaintenanceState::Draining,
            _ => MaintenanceState::Running,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MaintenanceState::Running => "running",
            MaintenanceState::Maintenance => "maintenance",
            MaintenanceState::Draining => "draining",
        }
    }
}

/// Stable WS close codes. Never renumbered once published.
pub const CLOSE_CODE_MAINTENANCE: u16 = 1013;
pub const CLOSE_CODE_DRAINING: u16 = 1012;

pub struct MaintenanceCoordinator {
    state: AtomicU8,
    deadline_at: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl MaintenanceCoordinator {
    pub fn new() -> Self {
        Self { state: AtomicU8::new(MaintenanceState::Running as u8), deadline_at: std::sync::Mutex::new(None) }
    }

    pub fn state(&self) -> MaintenanceState {
        MaintenanceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Seconds remaining until a draining deadline, for HTTP middleware's
    /// `retryAfterSeconds`; `None` outside draining or once passed.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        let deadline = (*self.deadline_at.lock().unwrap())?;
        let remaining = (deadline - Utc::now()).num_seconds();
        (remaining > 0).then_some(remaining)
    }

    fn set_state(&self, next: MaintenanceState) {
        self.state.store(next as u8, Ordering::SeqCst);
    }

    fn payload(&self, state: MaintenanceState, reason: Option<&str>) -> serde_json::Value {
        json!({
            "mode": state.as_str(),
            "reason": reason,
            "deadlineAt": *self.deadline_at.lock().unwrap(),
            "updatedAt": Utc::now(),
        })
    }

    /// Transitions to `maintenance` and returns the payload to publish on
    /// `system:maintenance`. The caller (the hub) publishes this through
    /// its normal append+fan-out path, then force-closes every connection
    /// with `CLOSE_CODE_MAINTENANCE` so that by the time the whole
    /// operation returns no connection remains active.
    pub fn enter_maintenance_payload(&self, reason: Option<&str>) -> serde_json::Value {
        *self.deadline_at.lock().unwrap() = None;
        self.set_state(MaintenanceState::Maintenance);
        self.payload(MaintenanceState::Maintenance, reason)
    }

    pub fn exit_maintenance_payload(&self) -> serde_json::Value {
        *self.deadline_at.lock().unwrap() = None;
        self.set_state(MaintenanceState::Running);
        self.payload(MaintenanceState::Running, None)
    }

    /// Transitions to `draining` with a deadline `deadline_seconds` out.
    pub fn start_draining_payload(&self, deadline_seconds: Option<u64>, reason: Option<&str>) -> serde_json::Value {
        let deadline = deadline_seconds.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
        *self.deadline_at.lock().unwrap() = deadline;
        self.set_state(MaintenanceState::Draining);
        self.payload(MaintenanceState::Draining, reason)
    }

    /// Marks and closes every currently registered connection with the
    /// given stable close code/reason. Per-connection send failures are
    /// ignored - a connection already gone has nothing left to notify.
    pub fn close_all(connections: &Arc<DashMap<String, Connection>>, code: u16, reason: &'static str) {
        for mut entry in connections.iter_mut() {
            let conn = entry.value_mut();
            conn.marked_for_close = true;
            let _ = conn.close(code, reason);
        }
    }
}

impl Default for MaintenanceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
