//! Cloud client port (driven/secondary port).
//!
//! The transport (HTTP, signing, endpoints) lives with the host; this trait
//! is the abstract surface the sync engine calls. Implementations map their
//! transport failures onto the [`SyncError`] taxonomy so the retryer can
//! classify them: throttling and connection failures become
//! [`SyncError::Retryable`], stale-version rejections become
//! [`SyncError::CloudConflict`], and missing shadows become
//! [`SyncError::NotFound`].

use serde_json::Value;

use crate::domain::{ShadowIdentity, SyncError};

/// A cloud shadow document at a specific version.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudDocument {
    /// The `{desired?, reported?}` state object.
    pub state: Value,
    /// Cloud version carrying that state.
    pub version: u64,
}

/// A cloud-observed change, delivered by the host's subscription channel
/// and fed into the sync handler.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudShadowEvent {
    /// The cloud document changed.
    Updated {
        /// Affected shadow.
        identity: ShadowIdentity,
        /// Full `{desired?, reported?}` state of the new cloud document.
        state: Value,
        /// Version of the new cloud document.
        version: u64,
    },
    /// The cloud document was deleted.
    Deleted {
        /// Affected shadow.
        identity: ShadowIdentity,
        /// Version of the deleted document, when the event carries one.
        version: Option<u64>,
    },
}

/// Port trait for the remote device-data service.
#[async_trait::async_trait]
pub trait CloudShadowClient: Send + Sync {
    /// Fetches the current cloud document. Fails with
    /// [`SyncError::NotFound`] when no cloud shadow exists.
    async fn get_shadow(&self, id: &ShadowIdentity) -> Result<CloudDocument, SyncError>;

    /// Pushes a state update expecting the given version, returning the
    /// version the cloud assigned. A stale `expected_version` fails with
    /// [`SyncError::CloudConflict`].
    async fn update_shadow(
        &self,
        id: &ShadowIdentity,
        state: &Value,
        expected_version: u64,
    ) -> Result<u64, SyncError>;

    /// Deletes the cloud document. Deleting an absent shadow is treated as
    /// success by callers, so implementations may surface
    /// [`SyncError::NotFound`] or succeed.
    async fn delete_shadow(&self, id: &ShadowIdentity) -> Result<(), SyncError>;
}
