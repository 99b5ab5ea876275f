//! Per-shadow synchronization bookkeeping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The last cloud state observed for one shadow identity.
///
/// Created when the identity is enrolled, updated only by the sync loop,
/// and destroyed when the identity leaves the sync set. The stored cloud
/// document is the base used by three-way merges during full
/// synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Last cloud document version observed or accepted; 0 if never.
    pub cloud_version: u64,
    /// Epoch seconds of that observation.
    pub cloud_update_time: i64,
    /// Serialized state of the last known cloud document.
    pub cloud_document: Option<Vec<u8>>,
    /// True when a cloud tombstone has been observed.
    pub cloud_deleted: bool,
    /// Last local document version that took part in a completed sync.
    pub local_version: u64,
    /// Epoch seconds at which the last sync completed.
    pub last_sync_time: i64,
}

impl SyncRecord {
    /// True when this identity has never completed a sync with the cloud.
    pub fn never_synced(&self) -> bool {
        self.cloud_version == 0 && !self.cloud_deleted
    }

    /// Decodes the stored cloud document state, if any.
    pub fn cloud_state(&self) -> Option<Value> {
        self.cloud_document
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    /// Records a completed sync against the given cloud state.
    pub fn record_sync(
        &mut self,
        cloud_state: Option<&Value>,
        cloud_version: u64,
        local_version: u64,
        now: i64,
    ) {
        self.cloud_document = cloud_state.map(|v| v.to_string().into_bytes());
        self.cloud_version = cloud_version;
        self.cloud_update_time = now;
        self.cloud_deleted = false;
        self.local_version = local_version;
        self.last_sync_time = now;
    }

    /// Records an observed cloud deletion.
    pub fn record_cloud_delete(&mut self, cloud_version: Option<u64>, now: i64) {
        if let Some(version) = cloud_version {
            self.cloud_version = self.cloud_version.max(version);
        }
        self.cloud_document = None;
        self.cloud_deleted = true;
        self.cloud_update_time = now;
        self.last_sync_time = now;
    }
}
