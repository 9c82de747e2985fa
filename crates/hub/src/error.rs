use gateway_common::ChannelParseError;
use thiserror::Error;

/// Closed error set for the hub, with stable wire-facing codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HubError {
    #[error("invalid channel: {0}")]
    InvalidChannel(#[from] ChannelParseError),

    #[error("subscription denied: {reason}")]
    SubscriptionDenied { reason: String },

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("cursor is malformed")]
    CursorMalformed,

    #[error("replay throttled: {current_count}/{limit} active")]
    Throttled { resume_after_ms: u64, current_count: u32, limit: u32 },

    #[error("durable event log unavailable")]
    EventLogUnavailable,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl HubError {
    /// Maps to the closed `code` table used by wire/REST error frames.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::InvalidChannel(_) => "INVALID_CHANNEL",
            HubError::SubscriptionDenied { .. } => "WS_SUBSCRIPTION_DENIED",
            HubError::ConnectionNotFound(_) => "INTERNAL_ERROR",
            HubError::CursorMalformed => "INVALID_FORMAT",
            HubError::Throttled { .. } => "WS_RATE_LIMITED",
            HubError::EventLogUnavailable => "INTERNAL_ERROR",
            HubError::Serialization(_) => "SERIALIZATION_ERROR",
            HubError::Sqlx(_) => "INTERNAL_ERROR",
            HubError::Other(_) => "INTERNAL_ERROR",
        }
    }

    pub fn severity(&self) -> &'static str {
        match self {
            HubError::InvalidChannel(_) | HubError::CursorMalformed => "recoverable",
            HubError::SubscriptionDenied { .. } => "terminal",
            HubError::Throttled { .. } | HubError::Serialization(_) | HubError::Other(_) | HubError::Sqlx(_) => "retry",
            HubError::ConnectionNotFound(_) => "retry",
            HubError::EventLogUnavailable => "retry",
        }
    }
}
