//! Engine assembly.
//!
//! Builds the full shadow engine out of a component configuration and the
//! host-supplied adapters: store, cloud client, connectivity probe, and
//! event bus. The host owns process lifecycle and credentials; this module
//! only wires the pieces so every component shares the same lock registry,
//! queue, and enrolled identity set.

use std::sync::Arc;
use std::time::Duration;

use umbra_core::config::{ComponentConfig, ConfigError, StrategyKind};
use umbra_core::ports::{
    CloudShadowClient, ConnectivityProbe, DiskUsageSource, ShadowEventBus, ShadowStore,
};
use umbra_core::ThingName;
use umbra_store::{CapacityGate, DiskUsageWatcher};
use umbra_sync::{
    PeriodicStrategy, RealTimeStrategy, RequestExecutor, RequestQueue, RetryConfig, Retryer,
    ShadowLockRegistry, SyncContext, SyncHandler, SyncStrategy, TokenBucket,
};

use crate::service::{AllowAllAuthorizer, LocalShadowService, ShadowAuthorizer};

/// Worker count for the real-time strategy.
const SYNC_WORKERS: usize = 4;

/// How often the strategies re-check connectivity while offline.
const OFFLINE_POLL: Duration = Duration::from_secs(1);

/// How often the disk usage watcher samples the store directory.
const USAGE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// The assembled shadow engine.
pub struct ShadowEngine {
    /// Sync coordination: start/stop, configuration swaps, cloud events.
    pub handler: Arc<SyncHandler>,
    /// The local request surface for co-located components.
    pub service: Arc<LocalShadowService>,
    /// The disk admission gate; feed it with a watcher or host signals.
    pub gate: CapacityGate,
    watcher: Option<DiskUsageWatcher>,
}

impl ShadowEngine {
    /// Starts shadow synchronization.
    pub async fn start(&self) {
        self.handler.start_syncing_shadows().await;
    }

    /// Stops syncing. The disk watcher keeps running; drop the engine to
    /// stop it.
    pub async fn stop(&self) {
        self.handler.stop_syncing_shadows().await;
    }

    /// Samples disk usage of the store directory into the gate on a
    /// dedicated task.
    pub fn attach_disk_watcher(&mut self, source: Arc<dyn DiskUsageSource>) {
        self.watcher = Some(DiskUsageWatcher::spawn(
            source,
            self.gate.clone(),
            USAGE_SAMPLE_INTERVAL,
        ));
    }
}

impl Drop for ShadowEngine {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
    }
}

/// Wires the engine from configuration and adapters.
///
/// `core_thing` is the device's own thing name, anchoring the `coreThing`
/// enrollment section when the configuration carries one. The
/// `authorizer` defaults to allow-all when `None`.
pub fn build_engine(
    config: &ComponentConfig,
    core_thing: Option<&ThingName>,
    store: Arc<dyn ShadowStore>,
    cloud: Arc<dyn CloudShadowClient>,
    connectivity: Arc<dyn ConnectivityProbe>,
    events: Arc<dyn ShadowEventBus>,
    authorizer: Option<Arc<dyn ShadowAuthorizer>>,
) -> Result<ShadowEngine, ConfigError> {
    config.validate()?;
    let enrolled = config.synchronize.enrolled_identities(core_thing)?;
    let direction = config.synchronize.direction;

    let locks = Arc::new(ShadowLockRegistry::new());
    let gate = CapacityGate::new(config.max_disk_utilization_bytes());

    let executor = RequestExecutor::new(
        store.clone(),
        cloud,
        locks.clone(),
        events.clone(),
        Arc::new(TokenBucket::per_second(
            config.rate_limits.max_outbound_updates_per_second,
        )),
        direction,
        config.synchronize.provide_sync_status,
    );

    let ctx = Arc::new(SyncContext {
        executor,
        retryer: Retryer::new(RetryConfig::default()),
        connectivity,
        enrolled: Arc::new(tokio::sync::RwLock::new(enrolled)),
        offline_poll: OFFLINE_POLL,
    });

    let queue = Arc::new(RequestQueue::with_direction(direction));
    let strategy: Arc<dyn SyncStrategy> = match config.strategy.kind {
        StrategyKind::RealTime => Arc::new(RealTimeStrategy::new(queue.clone(), SYNC_WORKERS)),
        StrategyKind::Periodic => Arc::new(PeriodicStrategy::new(
            queue.clone(),
            Duration::from_secs(config.strategy.delay),
        )),
    };

    let handler = Arc::new(SyncHandler::new(
        strategy,
        ctx,
        queue,
        store.clone(),
    ));

    let service = Arc::new(LocalShadowService::new(
        store,
        locks,
        gate.clone(),
        events,
        handler.clone(),
        authorizer.unwrap_or_else(|| Arc::new(AllowAllAuthorizer)),
        config,
    ));

    Ok(ShadowEngine {
        handler,
        service,
        gate,
        watcher: None,
    })
}
