//! Request/response DTOs and the error surface of the local contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use umbra_core::SyncError;

/// Read one shadow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetThingShadowRequest {
    /// Owning thing.
    pub thing_name: String,
    /// Shadow name; empty for the classic shadow.
    #[serde(default)]
    pub shadow_name: String,
}

/// Response to a get: the serialized document, delta included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetThingShadowResponse {
    /// Serialized shadow document.
    pub payload: Vec<u8>,
}

/// Update one shadow document with a state patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThingShadowRequest {
    /// Owning thing.
    pub thing_name: String,
    /// Shadow name; empty for the classic shadow.
    #[serde(default)]
    pub shadow_name: String,
    /// JSON update document: `{state: {desired?, reported?}, version?,
    /// clientToken?}`.
    pub payload: Vec<u8>,
}

/// Response to an update: the stored document after the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThingShadowResponse {
    /// Serialized shadow document as stored.
    pub payload: Vec<u8>,
}

/// Delete one shadow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteThingShadowRequest {
    /// Owning thing.
    pub thing_name: String,
    /// Shadow name; empty for the classic shadow.
    #[serde(default)]
    pub shadow_name: String,
}

/// List the named shadows of a thing, lexically ordered and paginated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNamedShadowsForThingRequest {
    /// Owning thing.
    pub thing_name: String,
    /// Page size, 1 to 100. Defaults to 25.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Opaque cursor from the previous page.
    #[serde(default)]
    pub next_token: Option<String>,
}

/// One page of named shadow names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNamedShadowsForThingResponse {
    /// Shadow names in this page.
    pub results: Vec<String>,
    /// Cursor for the next page; absent on the last page.
    pub next_token: Option<String>,
    /// Epoch seconds at which the listing was produced.
    pub timestamp: i64,
}

/// Typed failure surfaced to local callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Bad names, malformed JSON, size or depth overrun.
    #[error("invalid request: {0}")]
    InvalidArguments(String),

    /// The requested shadow does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The update carried a stale document version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller lacks permission for the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request was rejected by a rate limit.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Internal failure, including the capacity gate refusing writes.
    #[error("service error: {0}")]
    ServiceError(String),
}

impl From<SyncError> for ServiceError {
    fn from(err: SyncError) -> Self {
        match &err {
            SyncError::InvalidArguments(msg) => ServiceError::InvalidArguments(msg.clone()),
            SyncError::NotFound(what) => ServiceError::ResourceNotFound(what.clone()),
            SyncError::Unauthorized(msg) => ServiceError::Unauthorized(msg.clone()),
            SyncError::VersionConflict { .. } | SyncError::CloudConflict(_) => {
                ServiceError::Conflict(err.to_string())
            }
            _ => ServiceError::ServiceError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_mapping() {
        assert_eq!(
            ServiceError::from(SyncError::InvalidArguments("bad".into())),
            ServiceError::InvalidArguments("bad".into())
        );
        assert!(matches!(
            ServiceError::from(SyncError::NotFound("thing/shadow".into())),
            ServiceError::ResourceNotFound(_)
        ));
        assert!(matches!(
            ServiceError::from(SyncError::VersionConflict {
                expected: 2,
                actual: 1
            }),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from(SyncError::CapacityExceeded),
            ServiceError::ServiceError(_)
        ));
    }

    #[test]
    fn test_request_serde_names() {
        let req: UpdateThingShadowRequest = serde_json::from_value(serde_json::json!({
            "thingName": "t",
            "payload": [123, 125]
        }))
        .unwrap();
        assert_eq!(req.thing_name, "t");
        assert_eq!(req.shadow_name, "");
    }
}
