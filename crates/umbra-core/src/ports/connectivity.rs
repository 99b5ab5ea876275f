//! Connectivity probe port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reports whether the device currently has cloud connectivity.
///
/// The sync strategies consult the probe before draining the queue; while
/// offline they keep accepting requests but stop executing them.
pub trait ConnectivityProbe: Send + Sync {
    /// True when the cloud is reachable.
    fn is_connected(&self) -> bool;
}

/// A probe backed by a shared flag, flipped by the host's network monitor.
#[derive(Debug, Clone, Default)]
pub struct SharedConnectivity {
    connected: Arc<AtomicBool>,
}

impl SharedConnectivity {
    /// Creates a probe with the given initial state.
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    /// Updates the connectivity state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl ConnectivityProbe for SharedConnectivity {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
