//! Canonical REST envelopes shared by every route in this crate.

use serde::Serialize;
use utoipa::ToSchema;

/// Successful-response envelope: `{object, data, requestId}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Envelope<T: Serialize> {
    pub object: &'static str,
    pub data: T,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(object: &'static str, data: T) -> Self {
        Self { object, data, request_id: uuid::Uuid::new_v4().to_string() }
    }
}
