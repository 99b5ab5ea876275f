//! Per-variant execution of sync requests.
//!
//! Each request runs under its shadow's write lock, so all persistence
//! mutations for one identity are serialized while distinct identities
//! proceed in parallel. The outbound token bucket is consulted before
//! every cloud call, and direction gating decides which sides may be
//! written:
//!
//! - `DeviceToCloud` suppresses cloud-to-local writes (cloud updates and
//!   deletes still advance the sync record so they stay idempotent);
//! - `CloudToDevice` symmetrically suppresses local-to-cloud writes.
//!
//! Failures propagate as [`SyncError`] values; the retryer classifies
//! them, so this module never loops or sleeps on its own.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use umbra_core::ports::{CloudShadowClient, ShadowEvent, ShadowEventBus, ShadowStore};
use umbra_core::{
    ShadowDocument, ShadowIdentity, SyncDirection, SyncError, SyncRecord, SyncRequest,
};
use umbra_merge::{three_way_merge, MergeOwner};

use crate::locks::ShadowLockRegistry;
use crate::rate_limit::TokenBucket;

/// Dependencies and policy for request execution.
pub struct RequestExecutor {
    store: Arc<dyn ShadowStore>,
    cloud: Arc<dyn CloudShadowClient>,
    locks: Arc<ShadowLockRegistry>,
    events: Arc<dyn ShadowEventBus>,
    outbound: Arc<TokenBucket>,
    direction: SyncDirection,
    provide_sync_status: bool,
}

impl RequestExecutor {
    /// Creates an executor over the given ports.
    pub fn new(
        store: Arc<dyn ShadowStore>,
        cloud: Arc<dyn CloudShadowClient>,
        locks: Arc<ShadowLockRegistry>,
        events: Arc<dyn ShadowEventBus>,
        outbound: Arc<TokenBucket>,
        direction: SyncDirection,
        provide_sync_status: bool,
    ) -> Self {
        Self {
            store,
            cloud,
            locks,
            events,
            outbound,
            direction,
            provide_sync_status,
        }
    }

    /// The direction this executor gates on.
    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    /// The store this executor writes through.
    pub fn store(&self) -> &Arc<dyn ShadowStore> {
        &self.store
    }

    /// Executes one request under the shadow's write lock.
    #[instrument(skip(self, request), fields(identity = %request.identity(), kind = request.kind()))]
    pub async fn execute(&self, request: SyncRequest) -> Result<(), SyncError> {
        let lock = self.locks.lock_for(request.identity());
        let _guard = lock.lock().await;

        debug!("Executing sync request");

        match request {
            SyncRequest::LocalUpdate {
                identity,
                payload,
                expected_local_version,
            } => {
                self.local_update(&identity, payload, expected_local_version)
                    .await
            }
            SyncRequest::LocalDelete { identity } => self.local_delete(&identity).await,
            SyncRequest::CloudUpdate {
                identity,
                state,
                cloud_version,
            } => self.cloud_update(&identity, state, cloud_version).await,
            SyncRequest::CloudDelete {
                identity,
                cloud_version,
            } => self.cloud_delete(&identity, cloud_version).await,
            SyncRequest::FullShadowSync { identity } => self.full_sync(&identity).await,
            SyncRequest::OverwriteLocal { identity } => self.overwrite_local(&identity).await,
            SyncRequest::OverwriteCloud { identity } => self.overwrite_cloud(&identity).await,
        }
    }

    // ------------------------------------------------------------------
    // Local-to-cloud requests
    // ------------------------------------------------------------------

    async fn local_update(
        &self,
        identity: &ShadowIdentity,
        payload: Value,
        expected_local_version: u64,
    ) -> Result<(), SyncError> {
        let now = Utc::now().timestamp();
        let mut record = self.load_record(identity).await?;

        if !self.direction.allows_cloud_writes() {
            // The push is suppressed; remember the local version so a later
            // direction change does not re-sync stale state.
            record.local_version = expected_local_version;
            record.last_sync_time = now;
            self.store.put_sync(identity, &record).await?;
            return Ok(());
        }

        let local = self
            .store
            .get_shadow(identity)
            .await?
            .ok_or_else(|| SyncError::UnknownShadow(identity.to_string()))?;

        if local.version != expected_local_version {
            // The local document moved on while this request was queued.
            return Err(SyncError::VersionConflict {
                expected: local.version,
                actual: expected_local_version,
            });
        }

        self.outbound.acquire().await;
        let cloud_version = self
            .cloud
            .update_shadow(identity, &payload, record.cloud_version + 1)
            .await?;

        // The local state is the base the cloud now agrees with.
        record.record_sync(Some(&local.state_value()), cloud_version, local.version, now);
        self.store.put_sync(identity, &record).await?;
        self.publish_status(identity, &record, true).await;

        info!(%identity, cloud_version, "Pushed local update to cloud");
        Ok(())
    }

    async fn local_delete(&self, identity: &ShadowIdentity) -> Result<(), SyncError> {
        let now = Utc::now().timestamp();
        let mut record = self.load_record(identity).await?;

        if self.direction.allows_cloud_writes()
            && record.cloud_version > 0
            && !record.cloud_deleted
        {
            self.outbound.acquire().await;
            match self.cloud.delete_shadow(identity).await {
                Ok(()) => {}
                // An already-absent cloud shadow is a successful delete.
                Err(SyncError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        record.record_cloud_delete(None, now);
        self.store.put_sync(identity, &record).await?;
        self.publish_status(identity, &record, true).await;

        info!(%identity, "Propagated local delete to cloud");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cloud-to-local requests
    // ------------------------------------------------------------------

    async fn cloud_update(
        &self,
        identity: &ShadowIdentity,
        state: Value,
        cloud_version: u64,
    ) -> Result<(), SyncError> {
        let now = Utc::now().timestamp();
        let mut record = self.load_record(identity).await?;

        if cloud_version <= record.cloud_version {
            debug!(%identity, cloud_version, known = record.cloud_version,
                "Dropping stale cloud update");
            return Ok(());
        }

        if !self.direction.allows_local_writes() {
            // Bookkeeping still advances so the update stays idempotent.
            let local_version = record.local_version;
            record.record_sync(Some(&state), cloud_version, local_version, now);
            self.store.put_sync(identity, &record).await?;
            return Ok(());
        }

        let local = self.store.get_shadow(identity).await?;
        match local {
            None => {
                let doc = ShadowDocument::from_state(&state, 1, now);
                let stored = self.store.update_shadow(identity, &doc).await?;
                record.record_sync(Some(&state), cloud_version, stored.version, now);
            }
            Some(local) if local.version <= record.local_version => {
                // No unsynced local changes: the cloud document replaces
                // the local one outright.
                let doc = ShadowDocument::from_state(&state, local.version + 1, now);
                let stored = self.store.update_shadow(identity, &doc).await?;
                record.record_sync(Some(&state), cloud_version, stored.version, now);
            }
            Some(local) => {
                // Both sides diverged from the last synced base.
                let base = record.cloud_state().unwrap_or_else(|| json!({}));
                let merged =
                    three_way_merge(&local.state_value(), &state, &base, MergeOwner::Cloud);

                let doc = ShadowDocument::from_state(&merged, local.version + 1, now);
                let stored = self.store.update_shadow(identity, &doc).await?;

                let mut new_cloud_version = cloud_version;
                if merged != state && self.direction.allows_cloud_writes() {
                    self.outbound.acquire().await;
                    new_cloud_version = self
                        .cloud
                        .update_shadow(identity, &merged, cloud_version + 1)
                        .await?;
                }
                record.record_sync(Some(&merged), new_cloud_version, stored.version, now);
            }
        }

        self.store.put_sync(identity, &record).await?;
        self.publish_status(identity, &record, true).await;

        info!(%identity, cloud_version, "Applied cloud update locally");
        Ok(())
    }

    async fn cloud_delete(
        &self,
        identity: &ShadowIdentity,
        cloud_version: Option<u64>,
    ) -> Result<(), SyncError> {
        let now = Utc::now().timestamp();
        let mut record = self.load_record(identity).await?;

        if record.cloud_deleted && cloud_version.map_or(true, |v| v <= record.cloud_version) {
            debug!(%identity, "Dropping repeated cloud delete");
            return Ok(());
        }

        if self.direction.allows_local_writes() {
            self.store.delete_shadow(identity).await?;
        }

        record.record_cloud_delete(cloud_version, now);
        self.store.put_sync(identity, &record).await?;
        self.publish_status(identity, &record, true).await;

        info!(%identity, "Applied cloud delete locally");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Full synchronization and overrides
    // ------------------------------------------------------------------

    async fn full_sync(&self, identity: &ShadowIdentity) -> Result<(), SyncError> {
        let now = Utc::now().timestamp();
        let mut record = self.load_record(identity).await?;

        let owner = match self.direction {
            SyncDirection::DeviceToCloud => MergeOwner::Local,
            SyncDirection::CloudToDevice => MergeOwner::Cloud,
            SyncDirection::BetweenDeviceAndCloud => MergeOwner::Cloud,
        };

        let local = self.store.get_shadow(identity).await?;
        let cloud = match self.cloud.get_shadow(identity).await {
            Ok(doc) => Some(doc),
            Err(SyncError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        match (local, cloud) {
            (None, None) => {
                // Nothing on either side; just note that we looked.
                record.last_sync_time = now;
                self.store.put_sync(identity, &record).await?;
            }
            (Some(local), None) => {
                let push_local = record.never_synced()
                    || (local.version > record.local_version && owner == MergeOwner::Local);
                if push_local && self.direction.allows_cloud_writes() {
                    self.outbound.acquire().await;
                    let version = self
                        .cloud
                        .update_shadow(identity, &local.state_value(), record.cloud_version + 1)
                        .await?;
                    record.record_sync(Some(&local.state_value()), version, local.version, now);
                } else if push_local {
                    record.local_version = local.version;
                    record.last_sync_time = now;
                } else {
                    // The cloud tombstone wins.
                    if self.direction.allows_local_writes() {
                        self.store.delete_shadow(identity).await?;
                    }
                    record.record_cloud_delete(None, now);
                }
                self.store.put_sync(identity, &record).await?;
            }
            (None, Some(cloud)) => {
                if self.direction.allows_local_writes() {
                    let doc = ShadowDocument::from_state(&cloud.state, 1, now);
                    let stored = self.store.update_shadow(identity, &doc).await?;
                    record.record_sync(Some(&cloud.state), cloud.version, stored.version, now);
                } else {
                    let local_version = record.local_version;
                    record.record_sync(Some(&cloud.state), cloud.version, local_version, now);
                }
                self.store.put_sync(identity, &record).await?;
            }
            (Some(local), Some(cloud)) => {
                let base = record.cloud_state().unwrap_or_else(|| json!({}));
                let merged = three_way_merge(&local.state_value(), &cloud.state, &base, owner);

                let mut local_version = local.version;
                if merged != local.state_value() && self.direction.allows_local_writes() {
                    let doc = ShadowDocument::from_state(&merged, local.version + 1, now);
                    let stored = self.store.update_shadow(identity, &doc).await?;
                    local_version = stored.version;
                }

                let mut cloud_version = cloud.version;
                if merged != cloud.state && self.direction.allows_cloud_writes() {
                    self.outbound.acquire().await;
                    cloud_version = self
                        .cloud
                        .update_shadow(identity, &merged, cloud.version + 1)
                        .await?;
                }

                record.record_sync(Some(&merged), cloud_version, local_version, now);
                self.store.put_sync(identity, &record).await?;
            }
        }

        self.publish_status(identity, &record, true).await;
        info!(%identity, "Completed full shadow synchronization");
        Ok(())
    }

    async fn overwrite_local(&self, identity: &ShadowIdentity) -> Result<(), SyncError> {
        let now = Utc::now().timestamp();
        let mut record = self.load_record(identity).await?;

        if !self.direction.allows_local_writes() {
            debug!(%identity, "Skipping local overwrite under device-to-cloud direction");
            return Ok(());
        }

        match self.cloud.get_shadow(identity).await {
            Ok(cloud) => {
                let next_version = self
                    .store
                    .get_shadow(identity)
                    .await?
                    .map(|l| l.version + 1)
                    .unwrap_or(1);
                let doc = ShadowDocument::from_state(&cloud.state, next_version, now);
                let stored = self.store.update_shadow(identity, &doc).await?;
                record.record_sync(Some(&cloud.state), cloud.version, stored.version, now);
            }
            Err(SyncError::NotFound(_)) => {
                self.store.delete_shadow(identity).await?;
                record.record_cloud_delete(None, now);
            }
            Err(err) => return Err(err),
        }

        self.store.put_sync(identity, &record).await?;
        self.publish_status(identity, &record, true).await;

        info!(%identity, "Overwrote local document with cloud state");
        Ok(())
    }

    async fn overwrite_cloud(&self, identity: &ShadowIdentity) -> Result<(), SyncError> {
        let now = Utc::now().timestamp();
        let mut record = self.load_record(identity).await?;

        if !self.direction.allows_cloud_writes() {
            debug!(%identity, "Skipping cloud overwrite under cloud-to-device direction");
            return Ok(());
        }

        match self.store.get_shadow(identity).await? {
            Some(local) => {
                let state = local.state_value();
                self.outbound.acquire().await;
                let version = match self
                    .cloud
                    .update_shadow(identity, &state, record.cloud_version + 1)
                    .await
                {
                    Ok(version) => version,
                    Err(SyncError::CloudConflict(_)) => {
                        // Force-push: retry once with a freshly read version.
                        let fresh = match self.cloud.get_shadow(identity).await {
                            Ok(cloud) => cloud.version,
                            Err(SyncError::NotFound(_)) => 0,
                            Err(err) => return Err(err),
                        };
                        self.outbound.acquire().await;
                        self.cloud.update_shadow(identity, &state, fresh + 1).await?
                    }
                    Err(err) => return Err(err),
                };
                record.record_sync(Some(&state), version, local.version, now);
            }
            None => {
                if record.cloud_version > 0 && !record.cloud_deleted {
                    self.outbound.acquire().await;
                    match self.cloud.delete_shadow(identity).await {
                        Ok(()) | Err(SyncError::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                record.record_cloud_delete(None, now);
            }
        }

        self.store.put_sync(identity, &record).await?;
        self.publish_status(identity, &record, true).await;

        info!(%identity, "Overwrote cloud document with local state");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn load_record(&self, identity: &ShadowIdentity) -> Result<SyncRecord, SyncError> {
        Ok(self.store.get_sync(identity).await?.unwrap_or_default())
    }

    async fn publish_status(&self, identity: &ShadowIdentity, record: &SyncRecord, in_sync: bool) {
        if !self.provide_sync_status {
            return;
        }
        let event = ShadowEvent::SyncStatus {
            identity: identity.clone(),
            in_sync,
            cloud_version: record.cloud_version,
            local_version: record.local_version,
            timestamp: record.last_sync_time,
        };
        if let Err(err) = self.events.publish(event).await {
            debug!(%identity, error = %err, "Failed to publish sync status event");
        }
    }
}

/// Everything a strategy needs to drain the queue.
pub struct SyncContext {
    /// Request execution.
    pub executor: RequestExecutor,
    /// Retry policy.
    pub retryer: crate::retry::Retryer,
    /// Connectivity gate consulted before each poll.
    pub connectivity: Arc<dyn umbra_core::ports::ConnectivityProbe>,
    /// The enrolled identity set, shared with the handler.
    pub enrolled: Arc<tokio::sync::RwLock<std::collections::BTreeSet<ShadowIdentity>>>,
    /// How often to re-check connectivity while offline.
    pub offline_poll: std::time::Duration,
}

impl SyncContext {
    /// Waits until the cloud is reachable. When connectivity returns after
    /// an outage, a full synchronization is injected for every enrolled
    /// identity before normal draining resumes.
    pub async fn wait_until_connected(&self, queue: &crate::queue::RequestQueue) {
        let mut was_offline = false;
        while !self.connectivity.is_connected() {
            if queue.is_closed() {
                return;
            }
            was_offline = true;
            tokio::time::sleep(self.offline_poll).await;
        }
        if was_offline {
            info!("Connectivity restored, scheduling full synchronization");
            self.inject_full_syncs(queue).await;
        }
    }

    /// Queues a `FullShadowSync` for every enrolled identity.
    pub async fn inject_full_syncs(&self, queue: &crate::queue::RequestQueue) {
        let identities: Vec<ShadowIdentity> =
            self.enrolled.read().await.iter().cloned().collect();
        for identity in identities {
            queue.put_front(SyncRequest::FullShadowSync { identity });
        }
    }
}
