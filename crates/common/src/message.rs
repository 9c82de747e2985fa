//! `HubMessage` and the closed `MessageType` enum delivered over every channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of event kinds the hub can carry. Roughly sixty kinds
/// across agent output/state, reservations, conflicts, dcg, checkpoints,
/// fleet, mail, and system categories, per the wire contract other
/// collaborators (driver, router, client) already depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // --- agent output ---
    AgentOutputChunk,
    AgentOutputComplete,
    AgentOutputError,
    AgentOutputStreamStart,
    AgentOutputStreamEnd,

    // --- agent state ---
    AgentStateSnapshot,
    AgentStateStarted,
    AgentStateIdle,
    AgentStateBusy,
    AgentStateWaitingOnHuman,
    AgentStateTerminated,
    AgentStateCrashed,
    AgentStateRestarted,

    // --- agent tools ---
    ToolCallStarted,
    ToolCallOutput,
    ToolCallCompleted,
    ToolCallFailed,
    ToolCallDenied,

    // --- checkpoints ---
    CheckpointCreated,
    CheckpointRestored,
    CheckpointDeleted,
    CheckpointFailed,

    // --- reservations ---
    #[serde(rename = "reservation.acquired")]
    ReservationAcquired,
    #[serde(rename = "reservation.released")]
    ReservationReleased,
    #[serde(rename = "reservation.expired")]
    ReservationExpired,
    #[serde(rename = "reservation.denied")]
    ReservationDenied,

    // --- conflicts ---
    #[serde(rename = "conflict.opened")]
    ConflictOpened,
    #[serde(rename = "conflict.resolved")]
    ConflictResolved,

    // --- dcg (dependency/coordination graph) ---
    DcgNodeAdded,
    DcgNodeRemoved,
    DcgEdgeAdded,
    DcgEdgeRemoved,
    DcgCycleDetected,
    DcgWaveStarted,
    DcgWaveCompleted,

    // --- fleet ---
    FleetAgentJoined,
    FleetAgentLeft,
    FleetScalingStarted,
    FleetScalingCompleted,
    FleetHealthDegraded,
    FleetHealthRecovered,

    // --- safety ---
    SafetyBlockRaised,
    SafetyBlockCleared,
    SafetyAllowlistUpdated,
    ContextHealthWarning,
    ContextHealthEmergency,

    // --- human-in-the-loop / mail ---
    HitlRequested,
    HitlApproved,
    HitlRejected,
    HitlTimedOut,
    MailReceived,
    MailRead,
    NotificationPosted,
    NotificationDismissed,

    // --- workspace / git ---
    GitBranchChanged,
    GitCommitCreated,
    GitMergeConflict,
    WorkspaceAgentJoined,
    WorkspaceAgentLeft,

    // --- system ---
    #[serde(rename = "maintenance.state_changed")]
    MaintenanceStateChanged,
    SystemHealthOk,
    SystemHealthDegraded,
}

impl MessageType {
    /// Channels requiring acknowledgment: agent state snapshots,
    /// conflict lifecycle, reservation lifecycle, safety blocks, context
    /// health emergencies. This is a property of the message kind, closed
    /// and small, never inferred from payload contents.
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            MessageType::AgentStateSnapshot
                | MessageType::ConflictOpened
                | MessageType::ConflictResolved
                | MessageType::ReservationAcquired
                | MessageType::ReservationReleased
                | MessageType::ReservationExpired
                | MessageType::ReservationDenied
                | MessageType::SafetyBlockRaised
                | MessageType::SafetyBlockCleared
                | MessageType::ContextHealthEmergency
        )
    }
}

/// Correlation metadata carried alongside a message, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

/// A single published message, as delivered to subscribers. `cursor` is
/// assigned at append by the ring buffer and is immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    pub id: Uuid,
    pub cursor: String,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl HubMessage {
    pub fn requires_ack(&self) -> bool {
        self.message_type.requires_ack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_for_dotted_kinds() {
        let v = serde_json::to_value(MessageType::ReservationAcquired).unwrap();
        assert_eq!(v, serde_json::Value::String("reservation.acquired".to_string()));
        let v = serde_json::to_value(MessageType::MaintenanceStateChanged).unwrap();
        assert_eq!(v, serde_json::Value::String("maintenance.state_changed".to_string()));
    }

    #[test]
    fn ack_required_set_is_closed() {
        assert!(MessageType::ConflictOpened.requires_ack());
        assert!(!MessageType::AgentOutputChunk.requires_ack());
    }
}
