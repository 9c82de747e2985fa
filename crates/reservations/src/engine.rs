//! Per-project reservation/conflict state machine. Acquire and
//! release are serialized per project (not globally) so two different
//! projects never block each other - mutual exclusion is scoped to a
//! single project's concrete paths.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use gateway_common::MessageType;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ReservationError;
use crate::reservation::{Conflict, ConflictStatus, Reservation, ReservationMode, ReservationStatus};

/// Sink for the `reservation.*` / `conflict.*` events this engine raises.
/// Kept as a trait rather than a direct dependency on the hub so the
/// engine can run as a separate collaborator process while still
/// preserving the wire event contract.
#[async_trait]
pub trait ReservationEventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, message_type: MessageType, payload: serde_json::Value);
}

pub struct NoopPublisher;

#[async_trait]
impl ReservationEventPublisher for NoopPublisher {
    async fn publish(&self, _channel: &str, _message_type: MessageType, _payload: serde_json::Value) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCause {
    Explicit,
    ExpirySweep,
    AgentTerminated,
}

#[derive(Default)]
struct ProjectState {
    reservations: Vec<Reservation>,
    conflicts: Vec<Conflict>,
}

pub struct ReservationEngine {
    projects: Mutex<HashMap<String, Arc<Mutex<ProjectState>>>>,
    reservation_index: Mutex<HashMap<Uuid, String>>,
    publisher: Arc<dyn ReservationEventPublisher>,
    default_ttl: ChronoDuration,
}

impl ReservationEngine {
    pub fn new(publisher: Arc<dyn ReservationEventPublisher>, default_ttl_secs: u64) -> Self {
        Self {
            projects: Mutex::new(HashMap::new()),
            reservation_index: Mutex::new(HashMap::new()),
            publisher,
            default_ttl: ChronoDuration::seconds(default_ttl_secs as i64),
        }
    }

    async fn project_state(&self, project_id: &str) -> Arc<Mutex<ProjectState>> {
        let mut projects = self.projects.lock().await;
        Arc::clone(projects.entry(project_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(ProjectState::default()))))
    }

    /// Acquires a reservation, or refuses with the overlapping conflict's
    /// id (creating or reusing an open conflict record) if `patterns`
    /// overlaps an active exclusive reservation held by a different agent.
    #[tracing::instrument(skip(self, patterns), fields(project_id, agent_id))]
    pub async fn acquire(
        &self,
        project_id: &str,
        agent_id: &str,
        patterns: Vec<String>,
        mode: ReservationMode,
        ttl_secs: Option<u64>,
    ) -> Result<Reservation, ReservationError> {
        let state = self.project_state(project_id).await;
        let mut guard = state.lock().await;

        if let Some(existing) = guard
            .reservations
            .iter()
            .find(|r| r.status == ReservationStatus::Active && r.mode == ReservationMode::Exclusive && r.agent_id != agent_id && patterns_overlap(&r.patterns, &patterns))
        {
            let holder = existing.agent_id.clone();
            let overlapping = existing.patterns.clone();
            let candidate = Conflict {
                conflict_id: Uuid::new_v4(),
                project_id: project_id.to_string(),
                requester: agent_id.to_string(),
                holder: holder.clone(),
                overlapping_patterns: overlapping,
                status: ConflictStatus::Open,
                opened_at: Utc::now(),
                resolved_at: None,
                resolved_by: None,
                reason: None,
            };
            let dedup_key = candidate.dedup_key();

            let conflict = if let Some(open) = guard
                .conflicts
                .iter()
                .find(|c| c.status == ConflictStatus::Open && c.dedup_key() == dedup_key)
            {
                open.clone()
            } else {
                guard.conflicts.push(candidate.clone());
                let payload = serde_json::to_value(&candidate).unwrap_or_default();
                let channel = format!("workspace:conflicts:{project_id}");
                self.publisher.publish(&channel, MessageType::ConflictOpened, payload).await;
                candidate
            };

            return Err(ReservationError::Conflict { conflict_id: conflict.conflict_id, holder });
        }

        let now = Utc::now();
        let expires_at = Some(now + ttl_secs.map(|s| ChronoDuration::seconds(s as i64)).unwrap_or(self.default_ttl));
        let reservation = Reservation {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            patterns,
            mode,
            acquired_at: now,
            expires_at,
            status: ReservationStatus::Active,
        };
        guard.reservations.push(reservation.clone());
        self.reservation_index.lock().await.insert(reservation.id, project_id.to_string());
        drop(guard);

        let payload = serde_json::to_value(&reservation).unwrap_or_default();
        let channel = format!("workspace:reservations:{project_id}");
        self.publisher.publish(&channel, MessageType::ReservationAcquired, payload).await;

        Ok(reservation)
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, reservation_id: Uuid, cause: ReleaseCause) -> Result<Reservation, ReservationError> {
        let project_id = {
            let index = self.reservation_index.lock().await;
            index.get(&reservation_id).cloned().ok_or(ReservationError::ReservationNotFound(reservation_id))?
        };
        let state = self.project_state(&project_id).await;
        let mut guard = state.lock().await;

        let position = guard
            .reservations
            .iter()
            .position(|r| r.id == reservation_id)
            .ok_or(ReservationError::ReservationNotFound(reservation_id))?;
        let mut reservation = guard.reservations.remove(position);
        reservation.status = match cause {
            ReleaseCause::ExpirySweep => ReservationStatus::Expired,
            ReleaseCause::Explicit | ReleaseCause::AgentTerminated => ReservationStatus::Released,
        };
        drop(guard);
        self.reservation_index.lock().await.remove(&reservation_id);

        let message_type = match cause {
            ReleaseCause::ExpirySweep => MessageType::ReservationExpired,
            ReleaseCause::Explicit | ReleaseCause::AgentTerminated => MessageType::ReservationReleased,
        };
        let payload = serde_json::to_value(&reservation).unwrap_or_default();
        let channel = format!("workspace:reservations:{project_id}");
        self.publisher.publish(&channel, message_type, payload).await;

        Ok(reservation)
    }

    /// Releases every active reservation held by `agent_id`, across all
    /// projects, as part of agent termination handling.
    pub async fn release_all_for_agent(&self, agent_id: &str) -> Vec<Reservation> {
        let ids: Vec<Uuid> = {
            let projects = self.projects.lock().await;
            let mut ids = Vec::new();
            for project in projects.values() {
                let guard = project.lock().await;
                ids.extend(guard.reservations.iter().filter(|r| r.agent_id == agent_id).map(|r| r.id));
            }
            ids
        };
        let mut released = Vec::new();
        for id in ids {
            if let Ok(r) = self.release(id, ReleaseCause::AgentTerminated).await {
                released.push(r);
            }
        }
        released
    }

    /// Sweeps every project for reservations past `expires_at`, releasing
    /// each with cause `ExpirySweep`.
    pub async fn expire_sweep(&self) -> Vec<Reservation> {
        let now = Utc::now();
        let ids: Vec<Uuid> = {
            let projects = self.projects.lock().await;
            let mut ids = Vec::new();
            for project in projects.values() {
                let guard = project.lock().await;
                ids.extend(guard.reservations.iter().filter(|r| r.expires_at.map_or(false, |exp| exp <= now)).map(|r| r.id));
            }
            ids
        };
        let mut expired = Vec::new();
        for id in ids {
            if let Ok(r) = self.release(id, ReleaseCause::ExpirySweep).await {
                expired.push(r);
            }
        }
        expired
    }

    /// Marks `conflict_id` resolved (immutable thereafter) and publishes
    /// `conflict.resolved`. Unknown id -> 404-mapped error; already
    /// resolved -> 400-mapped error.
    pub async fn resolve_conflict(
        &self,
        project_id: &str,
        conflict_id: Uuid,
        resolved_by: &str,
        reason: Option<String>,
    ) -> Result<Conflict, ReservationError> {
        let state = self.project_state(project_id).await;
        let mut guard = state.lock().await;
        let conflict = guard
            .conflicts
            .iter_mut()
            .find(|c| c.conflict_id == conflict_id)
            .ok_or(ReservationError::ConflictNotFound(conflict_id))?;
        if conflict.status == ConflictStatus::Resolved {
            return Err(ReservationError::ConflictAlreadyResolved(conflict_id));
        }
        conflict.status = ConflictStatus::Resolved;
        conflict.resolved_at = Some(Utc::now());
        conflict.resolved_by = Some(resolved_by.to_string());
        conflict.reason = reason;
        let resolved = conflict.clone();
        drop(guard);

        let payload = serde_json::to_value(&resolved).unwrap_or_default();
        let channel = format!("workspace:conflicts:{project_id}");
        self.publisher.publish(&channel, MessageType::ConflictResolved, payload).await;

        Ok(resolved)
    }

    pub async fn list_conflicts(&self, project_id: &str, status: Option<ConflictStatus>) -> Vec<Conflict> {
        let state = self.project_state(project_id).await;
        let guard = state.lock().await;
        guard.conflicts.iter().filter(|c| status.map_or(true, |s| c.status == s)).cloned().collect()
    }

    pub async fn list_reservations(&self, project_id: &str) -> Vec<Reservation> {
        let state = self.project_state(project_id).await;
        let guard = state.lock().await;
        guard.reservations.clone()
    }
}

/// Periodic expiry sweep: reservations are also released by background
/// expiry, not only explicitly, on the same `tokio::spawn` + interval-tick
/// shape used by the durable event log's cleanup loop.
pub fn spawn_expiry_sweep_task(engine: Arc<ReservationEngine>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            let expired = engine.expire_sweep().await;
            if !expired.is_empty() {
                tracing::info!(count = expired.len(), "reservation expiry sweep released reservations");
            }
        }
    })
}

/// Two glob pattern sets overlap if any pair denotes overlapping concrete
/// paths. Concrete (wildcard-free) patterns are compared for equality or
/// containment in the other side's glob; wildcard patterns are compared
/// by cross-matching their literal strings against each other's `Pattern`.
fn patterns_overlap(a: &[String], b: &[String]) -> bool {
    a.iter().any(|pa| b.iter().any(|pb| single_pattern_overlap(pa, pb)))
}

fn single_pattern_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if let Ok(pattern) = glob::Pattern::new(a) {
        if pattern.matches(b) {
            return true;
        }
    }
    if let Ok(pattern) = glob::Pattern::new(b) {
        if pattern.matches(a) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ReservationEngine {
        ReservationEngine::new(Arc::new(NoopPublisher), 3600)
    }

    #[tokio::test]
    async fn acquire_then_overlapping_exclusive_is_refused_with_conflict() {
        let engine = engine();
        engine
            .acquire("p1", "a1", vec!["src/**/*.ts".to_string()], ReservationMode::Exclusive, None)
            .await
            .unwrap();

        let err = engine
            .acquire("p1", "a2", vec!["src/index.ts".to_string()], ReservationMode::Exclusive, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Conflict { .. }));

        let conflicts = engine.list_conflicts("p1", Some(ConflictStatus::Open)).await;
        assert_eq!(conflicts.len(), 1);
    }

    #[tokio::test]
    async fn repeated_overlap_reuses_existing_open_conflict() {
        let engine = engine();
        engine.acquire("p1", "a1", vec!["src/*.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap();
        engine.acquire("p1", "a2", vec!["src/a.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap_err();
        engine.acquire("p1", "a2", vec!["src/a.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap_err();

        assert_eq!(engine.list_conflicts("p1", Some(ConflictStatus::Open)).await.len(), 1);
    }

    #[tokio::test]
    async fn resolve_conflict_marks_resolved_and_is_then_immutable() {
        let engine = engine();
        engine.acquire("p1", "a1", vec!["src/x.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap();
        let err = engine
            .acquire("p1", "a2", vec!["src/x.ts".to_string()], ReservationMode::Exclusive, None)
            .await
            .unwrap_err();
        let ReservationError::Conflict { conflict_id, .. } = err else { panic!("expected conflict") };

        engine.resolve_conflict("p1", conflict_id, "a2", Some("manual".to_string())).await.unwrap();
        let err = engine.resolve_conflict("p1", conflict_id, "a2", None).await.unwrap_err();
        assert!(matches!(err, ReservationError::ConflictAlreadyResolved(_)));

        assert_eq!(engine.list_conflicts("p1", Some(ConflictStatus::Resolved)).await.len(), 1);
    }

    #[tokio::test]
    async fn release_removes_reservation_and_allows_reacquire() {
        let engine = engine();
        let reservation =
            engine.acquire("p1", "a1", vec!["src/y.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap();
        engine.release(reservation.id, ReleaseCause::Explicit).await.unwrap();

        let ok = engine.acquire("p1", "a2", vec!["src/y.ts".to_string()], ReservationMode::Exclusive, None).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn different_projects_do_not_conflict() {
        let engine = engine();
        engine.acquire("p1", "a1", vec!["src/z.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap();
        let ok = engine.acquire("p2", "a2", vec!["src/z.ts".to_string()], ReservationMode::Exclusive, None).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn agent_termination_releases_all_its_reservations() {
        let engine = engine();
        engine.acquire("p1", "a1", vec!["src/1.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap();
        engine.acquire("p1", "a1", vec!["src/2.ts".to_string()], ReservationMode::Exclusive, None).await.unwrap();
        let released = engine.release_all_for_agent("a1").await;
        assert_eq!(released.len(), 2);
        assert!(engine.list_reservations("p1").await.is_empty());
    }

    #[tokio::test]
    async fn expire_sweep_releases_only_past_expiry_and_frees_the_pattern() {
        let engine = engine();
        engine.acquire("p1", "a1", vec!["src/3.ts".to_string()], ReservationMode::Exclusive, Some(0)).await.unwrap();
        engine.acquire("p1", "a2", vec!["src/4.ts".to_string()], ReservationMode::Exclusive, Some(3600)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let expired = engine.expire_sweep().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, ReservationStatus::Expired);

        let remaining = engine.list_reservations("p1").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].agent_id, "a2");

        let ok = engine.acquire("p1", "a3", vec!["src/3.ts".to_string()], ReservationMode::Exclusive, None).await;
        assert!(ok.is_ok());
    }
}
