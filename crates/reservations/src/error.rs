use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReservationError {
    #[error("reservation conflicts with an active exclusive reservation held by {holder}")]
    Conflict { conflict_id: Uuid, holder: String },

    #[error("reservation {0} not found")]
    ReservationNotFound(Uuid),

    #[error("conflict {0} not found")]
    ConflictNotFound(Uuid),

    #[error("conflict {0} is already resolved")]
    ConflictAlreadyResolved(Uuid),

    #[error("invalid glob pattern {0:?}: {1}")]
    InvalidPattern(String, String),
}

impl ReservationError {
    pub fn code(&self) -> &'static str {
        match self {
            ReservationError::Conflict { .. } => "RESERVATION_CONFLICT",
            ReservationError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            ReservationError::ConflictNotFound(_) => "CONFLICT_NOT_FOUND",
            ReservationError::ConflictAlreadyResolved(_) => "INVALID_REQUEST",
            ReservationError::InvalidPattern(_, _) => "INVALID_REQUEST",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ReservationError::Conflict { .. } => 409,
            ReservationError::ReservationNotFound(_) | ReservationError::ConflictNotFound(_) => 404,
            ReservationError::ConflictAlreadyResolved(_) | ReservationError::InvalidPattern(_, _) => 400,
        }
    }
}
