//! The Umbra sync engine.
//!
//! Local shadow writes and cloud-observed changes become [`SyncRequest`]s
//! queued in a coalescing [`queue::RequestQueue`]. A [`strategy`] drains
//! the queue, continuously with a worker pool or on a periodic tick,
//! running each request through the [`retry::Retryer`] and the per-variant
//! algorithms in [`executor`]. The [`handler::SyncHandler`] owns the whole
//! pipeline: the enrolled identity set, configuration swaps, connectivity
//! gating, and the full-sync fan-out on startup and reconnect.
//!
//! [`SyncRequest`]: umbra_core::SyncRequest

pub mod executor;
pub mod handler;
pub mod locks;
pub mod merger;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod strategy;

pub use executor::{RequestExecutor, SyncContext};
pub use handler::SyncHandler;
pub use locks::ShadowLockRegistry;
pub use queue::RequestQueue;
pub use rate_limit::TokenBucket;
pub use retry::{RetryConfig, RetryOutcome, Retryer};
pub use strategy::{PeriodicStrategy, RealTimeStrategy, SyncStrategy};
