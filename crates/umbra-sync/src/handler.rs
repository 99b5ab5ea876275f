//! Top-level sync coordination.
//!
//! The [`SyncHandler`] owns the active sync configuration: the enrolled
//! identity set, the strategy draining the queue, and the translation of
//! local CRUD completions and cloud events into queued sync requests. On
//! start (and whenever connectivity returns) a full synchronization is
//! scheduled for every enrolled identity before anything else runs.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use umbra_core::ports::{CloudShadowEvent, ShadowStore};
use umbra_core::{ShadowIdentity, SyncError, SyncRequest};

use crate::executor::SyncContext;
use crate::queue::RequestQueue;
use crate::strategy::SyncStrategy;

/// Coordinates the sync pipeline: enrollment, strategy lifecycle, and
/// request translation.
pub struct SyncHandler {
    strategy: Arc<dyn SyncStrategy>,
    ctx: Arc<SyncContext>,
    queue: Arc<RequestQueue>,
    store: Arc<dyn ShadowStore>,
    enrolled: Arc<RwLock<BTreeSet<ShadowIdentity>>>,
    syncing: AtomicBool,
}

impl SyncHandler {
    /// Creates a handler over a strategy and its context. `queue` must be
    /// the queue the strategy drains, and the enrolled set is shared with
    /// the context so reconnect full-syncs see configuration changes.
    pub fn new(
        strategy: Arc<dyn SyncStrategy>,
        ctx: Arc<SyncContext>,
        queue: Arc<RequestQueue>,
        store: Arc<dyn ShadowStore>,
    ) -> Self {
        let enrolled = ctx.enrolled.clone();
        Self {
            strategy,
            ctx,
            queue,
            store,
            enrolled,
            syncing: AtomicBool::new(false),
        }
    }

    /// True while the sync loop is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Starts the sync loop and schedules a full synchronization for every
    /// enrolled identity. Idempotent.
    ///
    /// The full syncs are placed at the head of the queue before any worker
    /// starts draining, so they run before queued cloud events touch the
    /// local store.
    pub async fn start_syncing_shadows(&self) {
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!("Shadow sync already started");
            return;
        }
        info!("Starting shadow synchronization");
        self.ctx.inject_full_syncs(&self.queue).await;
        self.strategy.start(self.ctx.clone()).await;
    }

    /// Stops the sync loop. Queued requests are kept for the next start.
    /// Idempotent.
    pub async fn stop_syncing_shadows(&self) {
        if !self.syncing.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping shadow synchronization");
        self.strategy.stop().await;
    }

    /// Applies a new enrolled identity set atomically: stop, swap, start.
    ///
    /// Sync records of identities leaving the set are destroyed; freshly
    /// enrolled identities get their first full synchronization from the
    /// restart.
    pub async fn apply_configuration(&self, identities: BTreeSet<ShadowIdentity>) {
        let was_syncing = self.is_syncing();
        self.stop_syncing_shadows().await;

        let removed: Vec<ShadowIdentity> = {
            let mut enrolled = self.enrolled.write().await;
            let removed = enrolled.difference(&identities).cloned().collect();
            *enrolled = identities;
            removed
        };

        for identity in &removed {
            if let Err(err) = self.store.clear_sync(identity).await {
                warn!(%identity, error = %err, "Failed to clear sync record for removed identity");
            }
        }
        info!(removed = removed.len(), "Applied sync configuration");

        if was_syncing {
            self.start_syncing_shadows().await;
        }
    }

    /// Enrolls one identity at interaction time and schedules its first
    /// full synchronization.
    pub async fn enroll(&self, identity: ShadowIdentity) {
        let inserted = self.enrolled.write().await.insert(identity.clone());
        if inserted {
            info!(%identity, "Enrolled shadow for synchronization");
            self.submit(SyncRequest::FullShadowSync { identity }).await;
        }
    }

    /// True when the identity is enrolled for synchronization.
    pub async fn is_enrolled(&self, identity: &ShadowIdentity) -> bool {
        self.enrolled.read().await.contains(identity)
    }

    /// Queues the push of a locally accepted update.
    pub async fn on_local_update(
        &self,
        identity: ShadowIdentity,
        payload: Value,
        local_version: u64,
    ) {
        if !self.is_enrolled(&identity).await {
            debug!(%identity, "Ignoring local update for unenrolled shadow");
            return;
        }
        self.submit(SyncRequest::LocalUpdate {
            identity,
            payload,
            expected_local_version: local_version,
        })
        .await;
    }

    /// Queues the push of a local deletion.
    pub async fn on_local_delete(&self, identity: ShadowIdentity) {
        if !self.is_enrolled(&identity).await {
            debug!(%identity, "Ignoring local delete for unenrolled shadow");
            return;
        }
        self.submit(SyncRequest::LocalDelete { identity }).await;
    }

    /// Queues the application of a cloud-observed change.
    pub async fn on_cloud_event(&self, event: CloudShadowEvent) {
        let request = match event {
            CloudShadowEvent::Updated {
                identity,
                state,
                version,
            } => SyncRequest::CloudUpdate {
                identity,
                state,
                cloud_version: version,
            },
            CloudShadowEvent::Deleted { identity, version } => SyncRequest::CloudDelete {
                identity,
                cloud_version: version,
            },
        };
        if !self.is_enrolled(request.identity()).await {
            debug!(identity = %request.identity(), "Ignoring cloud event for unenrolled shadow");
            return;
        }
        self.submit(request).await;
    }

    /// Queues an externally triggered request (e.g. an operator-initiated
    /// override).
    pub async fn put_sync_request(&self, request: SyncRequest) -> Result<(), SyncError> {
        self.strategy.put_sync_request(request).await
    }

    /// Drops all queued requests.
    pub async fn clear_sync_queue(&self) {
        self.strategy.clear_queue().await;
    }

    /// Queue slots remaining.
    pub fn remaining_capacity(&self) -> usize {
        self.strategy.remaining_capacity()
    }

    async fn submit(&self, request: SyncRequest) {
        let identity = request.identity().clone();
        let kind = request.kind();
        match self.strategy.put_sync_request(request).await {
            Ok(()) => debug!(%identity, kind, "Queued sync request"),
            Err(SyncError::Interrupted) => {
                debug!(%identity, kind, "Sync stopped, discarding request")
            }
            Err(err) => warn!(%identity, kind, error = %err, "Failed to queue sync request"),
        }
    }
}
