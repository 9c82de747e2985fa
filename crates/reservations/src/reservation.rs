//! Reservation and conflict record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationMode {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub project_id: String,
    pub agent_id: String,
    pub patterns: Vec<String>,
    pub mode: ReservationMode,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub conflict_id: Uuid,
    pub project_id: String,
    pub requester: String,
    pub holder: String,
    pub overlapping_patterns: Vec<String>,
    pub status: ConflictStatus,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub reason: Option<String>,
}

impl Conflict {
    /// The key identifying "the same" conflict for dedup purposes: at
    /// most one open conflict per this tuple.
    pub fn dedup_key(&self) -> (String, String, String, Vec<String>) {
        let mut patterns = self.overlapping_patterns.clone();
        patterns.sort();
        (self.project_id.clone(), self.requester.clone(), self.holder.clone(), patterns)
    }
}
