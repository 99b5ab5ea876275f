//! Sync request variants.
//!
//! Every unit of work the sync engine executes is one of these variants.
//! Requests are keyed by shadow identity in the request queue, where two
//! pending requests for the same identity are combined by the request
//! merger.

use serde_json::Value;

use super::name::ShadowIdentity;

/// One queued unit of synchronization work for a single shadow.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncRequest {
    /// A locally accepted update that has to reach the cloud. Carries the
    /// cumulative state patch and the local version it produced.
    LocalUpdate {
        /// Target shadow.
        identity: ShadowIdentity,
        /// Cumulative `{desired?, reported?}` patch to push.
        payload: Value,
        /// Local document version after the triggering update.
        expected_local_version: u64,
    },
    /// A local deletion that has to reach the cloud.
    LocalDelete {
        /// Target shadow.
        identity: ShadowIdentity,
    },
    /// A cloud-observed update that has to be applied locally.
    CloudUpdate {
        /// Target shadow.
        identity: ShadowIdentity,
        /// Full `{desired?, reported?}` state of the cloud document.
        state: Value,
        /// Cloud document version carrying that state.
        cloud_version: u64,
    },
    /// A cloud-observed deletion to apply locally.
    CloudDelete {
        /// Target shadow.
        identity: ShadowIdentity,
        /// Version of the deleted cloud document, when known.
        cloud_version: Option<u64>,
    },
    /// Full three-way reconciliation of both sides against the last synced
    /// base.
    FullShadowSync {
        /// Target shadow.
        identity: ShadowIdentity,
    },
    /// Replace the local document with the current cloud document.
    OverwriteLocal {
        /// Target shadow.
        identity: ShadowIdentity,
    },
    /// Force-push the local document to the cloud, overriding conflicts.
    OverwriteCloud {
        /// Target shadow.
        identity: ShadowIdentity,
    },
}

impl SyncRequest {
    /// The shadow this request targets.
    pub fn identity(&self) -> &ShadowIdentity {
        match self {
            SyncRequest::LocalUpdate { identity, .. }
            | SyncRequest::LocalDelete { identity }
            | SyncRequest::CloudUpdate { identity, .. }
            | SyncRequest::CloudDelete { identity, .. }
            | SyncRequest::FullShadowSync { identity }
            | SyncRequest::OverwriteLocal { identity }
            | SyncRequest::OverwriteCloud { identity } => identity,
        }
    }

    /// A full synchronization request for the same identity.
    pub fn into_full_sync(self) -> SyncRequest {
        SyncRequest::FullShadowSync {
            identity: self.identity().clone(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncRequest::LocalUpdate { .. } => "local_update",
            SyncRequest::LocalDelete { .. } => "local_delete",
            SyncRequest::CloudUpdate { .. } => "cloud_update",
            SyncRequest::CloudDelete { .. } => "cloud_delete",
            SyncRequest::FullShadowSync { .. } => "full_shadow_sync",
            SyncRequest::OverwriteLocal { .. } => "overwrite_local",
            SyncRequest::OverwriteCloud { .. } => "overwrite_cloud",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_accessor() {
        let id = ShadowIdentity::parse("thing", "shadow").unwrap();
        let req = SyncRequest::LocalDelete {
            identity: id.clone(),
        };
        assert_eq!(req.identity(), &id);
    }

    #[test]
    fn test_into_full_sync_keeps_identity() {
        let id = ShadowIdentity::parse("thing", "").unwrap();
        let req = SyncRequest::CloudDelete {
            identity: id.clone(),
            cloud_version: Some(3),
        };
        assert_eq!(
            req.into_full_sync(),
            SyncRequest::FullShadowSync { identity: id }
        );
    }
}
