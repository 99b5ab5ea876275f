//! Per-shadow write lock registry.
//!
//! Every mutation of a shadow, whether a local write from the request
//! surface or a sync request execution, runs under that shadow's lock,
//! serializing effects per identity while identities proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use umbra_core::ShadowIdentity;

/// Maps shadow identities to mutex handles, created on first use.
///
/// Handles are never removed: the identity set is small and long-lived, so
/// the registry is bounded by it.
#[derive(Debug, Default)]
pub struct ShadowLockRegistry {
    locks: DashMap<ShadowIdentity, Arc<Mutex<()>>>,
}

impl ShadowLockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock handle for an identity, creating it on first use.
    pub fn lock_for(&self, id: &ShadowIdentity) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of identities with a handle.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True when no handle has been created yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
