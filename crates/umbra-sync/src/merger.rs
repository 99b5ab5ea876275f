//! Combining two pending requests for the same shadow.
//!
//! When a request arrives for an identity that already has a queued entry,
//! the two are collapsed into a single request that preserves the intent of
//! both. The decision depends on the pair of variants and, for a few cells,
//! on the configured sync direction:
//!
//! - same-side updates merge their payloads (incoming wins per field);
//! - an update meeting the opposite side's update diverges into a full
//!   synchronization, unless the direction already names a winner;
//! - deletes dominate updates on the same side; opposite-side delete pairs
//!   need a full synchronization to decide;
//! - override requests dominate everything, and when the two override
//!   variants meet, the one matching the direction wins.

use tracing::debug;

use umbra_core::{SyncDirection, SyncRequest};
use umbra_merge::merge;

/// Collapses `existing` and `incoming` into the single request left in the
/// queue. `existing` keeps its queue position.
pub fn merge_requests(
    existing: SyncRequest,
    incoming: SyncRequest,
    direction: SyncDirection,
) -> SyncRequest {
    use SyncRequest::*;

    debug_assert_eq!(existing.identity(), incoming.identity());
    let identity = existing.identity().clone();

    let merged = match (existing, incoming) {
        // Opposing overrides: the direction names the winner; under
        // bidirectional sync nobody does, so reconcile fully.
        (OverwriteLocal { .. }, OverwriteCloud { .. })
        | (OverwriteCloud { .. }, OverwriteLocal { .. }) => match direction {
            SyncDirection::DeviceToCloud => OverwriteCloud { identity },
            SyncDirection::CloudToDevice => OverwriteLocal { identity },
            SyncDirection::BetweenDeviceAndCloud => FullShadowSync { identity },
        },

        // Overrides dominate every other variant.
        (_, over @ OverwriteLocal { .. }) | (_, over @ OverwriteCloud { .. }) => over,
        (over @ OverwriteLocal { .. }, _) | (over @ OverwriteCloud { .. }, _) => over,

        // A full sync absorbs anything it meets.
        (FullShadowSync { .. }, _) | (_, FullShadowSync { .. }) => FullShadowSync { identity },

        // Same-side updates coalesce; the later payload wins per field.
        (
            LocalUpdate {
                payload: mut base, ..
            },
            LocalUpdate {
                payload: patch,
                expected_local_version,
                ..
            },
        ) => match merge(&mut base, &patch) {
            Ok(()) => LocalUpdate {
                identity,
                payload: base,
                expected_local_version,
            },
            Err(_) => FullShadowSync { identity },
        },
        (
            CloudUpdate {
                state: mut base,
                cloud_version: existing_version,
                ..
            },
            CloudUpdate {
                state: patch,
                cloud_version: incoming_version,
                ..
            },
        ) => match merge(&mut base, &patch) {
            Ok(()) => CloudUpdate {
                identity,
                state: base,
                cloud_version: existing_version.max(incoming_version),
            },
            Err(_) => FullShadowSync { identity },
        },

        // Updates from opposite sides diverged; unless the direction names
        // a winner, only a full sync can reconcile them.
        (LocalUpdate { .. }, CloudUpdate { .. }) | (CloudUpdate { .. }, LocalUpdate { .. }) => {
            match direction {
                SyncDirection::DeviceToCloud => OverwriteCloud { identity },
                SyncDirection::CloudToDevice => OverwriteLocal { identity },
                SyncDirection::BetweenDeviceAndCloud => FullShadowSync { identity },
            }
        }

        // Opposite-side deletions contradict each other.
        (LocalDelete { .. }, CloudDelete { .. }) | (CloudDelete { .. }, LocalDelete { .. }) => {
            FullShadowSync { identity }
        }

        // A pending delete dominates same-side and update traffic.
        (del @ LocalDelete { .. }, _) | (del @ CloudDelete { .. }, _) => del,
        (_, del @ LocalDelete { .. }) | (_, del @ CloudDelete { .. }) => del,
    };

    debug!(identity = %merged.identity(), kind = merged.kind(), "Coalesced queued request");
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use umbra_core::ShadowIdentity;

    fn id() -> ShadowIdentity {
        ShadowIdentity::parse("thing", "shadow").unwrap()
    }

    fn local_update(payload: serde_json::Value, version: u64) -> SyncRequest {
        SyncRequest::LocalUpdate {
            identity: id(),
            payload,
            expected_local_version: version,
        }
    }

    fn cloud_update(state: serde_json::Value, version: u64) -> SyncRequest {
        SyncRequest::CloudUpdate {
            identity: id(),
            state,
            cloud_version: version,
        }
    }

    fn full_sync() -> SyncRequest {
        SyncRequest::FullShadowSync { identity: id() }
    }

    const BIDI: SyncDirection = SyncDirection::BetweenDeviceAndCloud;

    #[test]
    fn test_local_updates_merge_right_biased() {
        let merged = merge_requests(
            local_update(json!({"reported": {"x": 1, "shared": "old"}}), 1),
            local_update(json!({"reported": {"y": 2, "shared": "new"}}), 2),
            BIDI,
        );
        match merged {
            SyncRequest::LocalUpdate {
                payload,
                expected_local_version,
                ..
            } => {
                assert_eq!(
                    payload,
                    json!({"reported": {"x": 1, "y": 2, "shared": "new"}})
                );
                assert_eq!(expected_local_version, 2);
            }
            other => panic!("unexpected merge result: {other:?}"),
        }
    }

    #[test]
    fn test_cloud_updates_keep_highest_version() {
        let merged = merge_requests(
            cloud_update(json!({"desired": {"a": 1}}), 4),
            cloud_update(json!({"desired": {"b": 2}}), 7),
            BIDI,
        );
        match merged {
            SyncRequest::CloudUpdate {
                state,
                cloud_version,
                ..
            } => {
                assert_eq!(state, json!({"desired": {"a": 1, "b": 2}}));
                assert_eq!(cloud_version, 7);
            }
            other => panic!("unexpected merge result: {other:?}"),
        }
    }

    #[test]
    fn test_cross_side_updates_become_full_sync() {
        let merged = merge_requests(
            local_update(json!({"reported": {"x": 1}}), 1),
            cloud_update(json!({"desired": {"y": 2}}), 3),
            BIDI,
        );
        assert_eq!(merged, full_sync());
    }

    #[test]
    fn test_cross_side_updates_collapse_under_direction() {
        let merged = merge_requests(
            local_update(json!({"reported": {"x": 1}}), 1),
            cloud_update(json!({"desired": {"y": 2}}), 3),
            SyncDirection::DeviceToCloud,
        );
        assert_eq!(merged, SyncRequest::OverwriteCloud { identity: id() });

        let merged = merge_requests(
            cloud_update(json!({"desired": {"y": 2}}), 3),
            local_update(json!({"reported": {"x": 1}}), 1),
            SyncDirection::CloudToDevice,
        );
        assert_eq!(merged, SyncRequest::OverwriteLocal { identity: id() });
    }

    #[test]
    fn test_delete_dominates_update() {
        let merged = merge_requests(
            local_update(json!({"reported": {}}), 1),
            SyncRequest::LocalDelete { identity: id() },
            BIDI,
        );
        assert_eq!(merged, SyncRequest::LocalDelete { identity: id() });

        let merged = merge_requests(
            SyncRequest::CloudDelete {
                identity: id(),
                cloud_version: Some(2),
            },
            cloud_update(json!({"desired": {}}), 3),
            BIDI,
        );
        assert!(matches!(merged, SyncRequest::CloudDelete { .. }));
    }

    #[test]
    fn test_opposite_deletes_become_full_sync() {
        let merged = merge_requests(
            SyncRequest::LocalDelete { identity: id() },
            SyncRequest::CloudDelete {
                identity: id(),
                cloud_version: None,
            },
            BIDI,
        );
        assert_eq!(merged, full_sync());

        let merged = merge_requests(
            SyncRequest::CloudDelete {
                identity: id(),
                cloud_version: None,
            },
            SyncRequest::LocalDelete { identity: id() },
            BIDI,
        );
        assert_eq!(merged, full_sync());
    }

    #[test]
    fn test_full_sync_absorbs_everything() {
        for other in [
            local_update(json!({"reported": {}}), 1),
            SyncRequest::LocalDelete { identity: id() },
            cloud_update(json!({}), 1),
            SyncRequest::CloudDelete {
                identity: id(),
                cloud_version: None,
            },
            full_sync(),
        ] {
            assert_eq!(merge_requests(full_sync(), other.clone(), BIDI), full_sync());
            assert_eq!(merge_requests(other, full_sync(), BIDI), full_sync());
        }
    }

    #[test]
    fn test_overrides_dominate() {
        let merged = merge_requests(
            full_sync(),
            SyncRequest::OverwriteLocal { identity: id() },
            BIDI,
        );
        assert_eq!(merged, SyncRequest::OverwriteLocal { identity: id() });

        let merged = merge_requests(
            SyncRequest::OverwriteCloud { identity: id() },
            SyncRequest::LocalDelete { identity: id() },
            BIDI,
        );
        assert_eq!(merged, SyncRequest::OverwriteCloud { identity: id() });
    }

    #[test]
    fn test_opposing_overrides_follow_direction() {
        let pair = || {
            (
                SyncRequest::OverwriteLocal { identity: id() },
                SyncRequest::OverwriteCloud { identity: id() },
            )
        };

        let (a, b) = pair();
        assert_eq!(
            merge_requests(a, b, SyncDirection::DeviceToCloud),
            SyncRequest::OverwriteCloud { identity: id() }
        );
        let (a, b) = pair();
        assert_eq!(
            merge_requests(b, a, SyncDirection::CloudToDevice),
            SyncRequest::OverwriteLocal { identity: id() }
        );
        let (a, b) = pair();
        assert_eq!(merge_requests(a, b, BIDI), full_sync());
    }
}
