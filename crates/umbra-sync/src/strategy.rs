//! Queue-draining strategies.
//!
//! Two interchangeable schedulers share one contract: the real-time
//! strategy keeps a pool of workers polling the queue continuously, while
//! the periodic strategy drains the queue to empty on a fixed tick and
//! lets requests coalesce in between. Both consult the connectivity probe
//! before draining and run every request through the retryer, dispatching
//! on its outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use umbra_core::{SyncError, SyncRequest};

use crate::executor::SyncContext;
use crate::queue::RequestQueue;
use crate::retry::RetryOutcome;

/// Contract shared by the queue-draining schedulers.
#[async_trait::async_trait]
pub trait SyncStrategy: Send + Sync {
    /// Starts draining. Idempotent.
    async fn start(&self, ctx: Arc<SyncContext>);

    /// Stops draining: closes the queue, waits a grace period for in-flight
    /// requests, then aborts stragglers. Idempotent.
    async fn stop(&self);

    /// Submits a request, coalescing with any queued entry for the same
    /// identity. Fails with [`SyncError::Interrupted`] while stopped.
    async fn put_sync_request(&self, request: SyncRequest) -> Result<(), SyncError>;

    /// Drops every queued request.
    async fn clear_queue(&self);

    /// Queue slots left before `put_sync_request` blocks.
    fn remaining_capacity(&self) -> usize;
}

/// What a drain loop should do after handling one request.
enum StepResult {
    /// Keep going; execute the carried request next if present.
    Continue(Option<SyncRequest>),
    /// The strategy is stopping.
    Stop,
}

/// Runs one request through the retryer and applies the outcome to the
/// queue. Shared by both strategies.
async fn execute_step(
    ctx: &SyncContext,
    queue: &RequestQueue,
    request: SyncRequest,
) -> StepResult {
    let outcome = ctx
        .retryer
        .run(request, |r| ctx.executor.execute(r))
        .await;

    match outcome {
        RetryOutcome::Completed | RetryOutcome::Dropped => StepResult::Continue(None),
        RetryOutcome::Requeue(request) => {
            // Re-queue without losing head-of-line progress: the request
            // goes to the back and the current head comes out.
            match queue.offer_and_take(request, false).await {
                Ok(next) => StepResult::Continue(Some(next)),
                Err(_) => StepResult::Stop,
            }
        }
        RetryOutcome::MutateToFullSync(full_sync) => {
            queue.put_front(full_sync);
            StepResult::Continue(None)
        }
        RetryOutcome::Interrupted(request) => {
            // Reinstate the in-flight request for the next start.
            queue.put_front(request);
            StepResult::Stop
        }
    }
}

// ============================================================================
// Real-time strategy
// ============================================================================

/// Worker-pool scheduler: `workers` tasks poll the queue continuously.
pub struct RealTimeStrategy {
    queue: Arc<RequestQueue>,
    workers: usize,
    grace: Duration,
    syncing: AtomicBool,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl RealTimeStrategy {
    /// Creates a real-time strategy over the given queue.
    pub fn new(queue: Arc<RequestQueue>, workers: usize) -> Self {
        Self {
            queue,
            workers: workers.max(1),
            grace: Duration::from_secs(5),
            syncing: AtomicBool::new(false),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Overrides the stop grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn worker_loop(ctx: Arc<SyncContext>, queue: Arc<RequestQueue>, worker: usize) {
        debug!(worker, "Sync worker started");
        loop {
            ctx.wait_until_connected(&queue).await;
            let Some(mut request) = queue.poll().await else {
                break;
            };
            loop {
                match execute_step(&ctx, &queue, request).await {
                    StepResult::Continue(Some(next)) => request = next,
                    StepResult::Continue(None) => break,
                    StepResult::Stop => {
                        debug!(worker, "Sync worker stopping mid-request");
                        return;
                    }
                }
            }
        }
        debug!(worker, "Sync worker stopped");
    }
}

#[async_trait::async_trait]
impl SyncStrategy for RealTimeStrategy {
    async fn start(&self, ctx: Arc<SyncContext>) {
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!("Real-time strategy already running");
            return;
        }

        self.queue.open();
        let mut tasks = self.tasks.lock().await;
        for worker in 0..self.workers {
            let ctx = ctx.clone();
            let queue = self.queue.clone();
            tasks.push(tokio::spawn(Self::worker_loop(ctx, queue, worker)));
        }
        info!(workers = self.workers, "Real-time sync strategy started");
    }

    async fn stop(&self) {
        if !self.syncing.swap(false, Ordering::SeqCst) {
            return;
        }

        self.queue.close();
        let mut tasks = self.tasks.lock().await;
        for mut handle in tasks.drain(..) {
            if tokio::time::timeout(self.grace, &mut handle).await.is_err() {
                warn!("Sync worker did not stop within the grace period, aborting");
                handle.abort();
            }
        }
        info!("Real-time sync strategy stopped");
    }

    async fn put_sync_request(&self, request: SyncRequest) -> Result<(), SyncError> {
        self.queue.put(request).await
    }

    async fn clear_queue(&self) {
        self.queue.clear();
    }

    fn remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }
}

// ============================================================================
// Periodic strategy
// ============================================================================

/// Tick scheduler: a single task drains the queue to empty every `delay`.
/// Between ticks, submitted requests coalesce in the queue.
pub struct PeriodicStrategy {
    queue: Arc<RequestQueue>,
    delay: Duration,
    grace: Duration,
    syncing: AtomicBool,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicStrategy {
    /// Creates a periodic strategy draining every `delay`.
    pub fn new(queue: Arc<RequestQueue>, delay: Duration) -> Self {
        Self {
            queue,
            delay,
            grace: Duration::from_secs(5),
            syncing: AtomicBool::new(false),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Overrides the stop grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn tick_loop(ctx: Arc<SyncContext>, queue: Arc<RequestQueue>, delay: Duration) {
        let mut ticker = tokio::time::interval(delay);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if queue.is_closed() {
                break;
            }
            ctx.wait_until_connected(&queue).await;
            debug!(pending = queue.len(), "Periodic sync tick");

            while let Some(mut request) = queue.try_poll() {
                loop {
                    match execute_step(&ctx, &queue, request).await {
                        StepResult::Continue(Some(next)) => request = next,
                        StepResult::Continue(None) => break,
                        StepResult::Stop => return,
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl SyncStrategy for PeriodicStrategy {
    async fn start(&self, ctx: Arc<SyncContext>) {
        if self.syncing.swap(true, Ordering::SeqCst) {
            debug!("Periodic strategy already running");
            return;
        }

        self.queue.open();
        let queue = self.queue.clone();
        let delay = self.delay;
        *self.task.lock().await = Some(tokio::spawn(Self::tick_loop(ctx, queue, delay)));
        info!(delay_secs = self.delay.as_secs(), "Periodic sync strategy started");
    }

    async fn stop(&self) {
        if !self.syncing.swap(false, Ordering::SeqCst) {
            return;
        }

        self.queue.close();
        if let Some(mut handle) = self.task.lock().await.take() {
            if tokio::time::timeout(self.grace, &mut handle).await.is_err() {
                warn!("Periodic sync task did not stop within the grace period, aborting");
                handle.abort();
            }
        }
        info!("Periodic sync strategy stopped");
    }

    async fn put_sync_request(&self, request: SyncRequest) -> Result<(), SyncError> {
        self.queue.put(request).await
    }

    async fn clear_queue(&self) {
        self.queue.clear();
    }

    fn remaining_capacity(&self) -> usize {
        self.queue.remaining_capacity()
    }
}
