//! Disk capacity gate for the shadow store directory.
//!
//! A background watcher samples a [`DiskUsageSource`] on a fixed interval
//! and flips the shared [`CapacityGate`] flag when usage crosses the
//! configured ceiling. Writers sample the gate atomically before accepting
//! a local update; while the flag is set, writes are refused. Recovery is
//! automatic on the next sample below the ceiling.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use umbra_core::ports::DiskUsageSource;

/// Shared admission flag compared against a byte ceiling.
#[derive(Debug, Clone)]
pub struct CapacityGate {
    exceeded: Arc<AtomicBool>,
    ceiling_bytes: u64,
}

impl CapacityGate {
    /// Creates a gate with the given ceiling in bytes.
    pub fn new(ceiling_bytes: u64) -> Self {
        Self {
            exceeded: Arc::new(AtomicBool::new(false)),
            ceiling_bytes,
        }
    }

    /// True while the last sample exceeded the ceiling.
    pub fn is_exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Acquire)
    }

    /// The configured ceiling in bytes.
    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Forces the exceeded flag, bypassing sampling. Used by hosts that
    /// learn about disk pressure out of band, and by tests.
    pub fn set_exceeded(&self, exceeded: bool) {
        self.exceeded.store(exceeded, Ordering::Release);
    }

    fn record_usage(&self, usage: u64) {
        let exceeded = usage > self.ceiling_bytes;
        let previous = self.exceeded.swap(exceeded, Ordering::AcqRel);
        if exceeded && !previous {
            warn!(
                usage,
                ceiling = self.ceiling_bytes,
                "Shadow storage capacity exceeded; refusing local writes"
            );
        } else if !exceeded && previous {
            info!(
                usage,
                ceiling = self.ceiling_bytes,
                "Shadow storage back under capacity; accepting local writes"
            );
        }
    }
}

/// Usage source that walks the store directory and sums file sizes.
pub struct DirUsageSource {
    root: PathBuf,
}

impl DirUsageSource {
    /// Creates a source over the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl DiskUsageSource for DirUsageSource {
    async fn usage_bytes(&self) -> anyhow::Result<u64> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || dir_size(&root))
            .await
            .map_err(|e| anyhow::anyhow!("usage walk panicked: {e}"))?
    }
}

fn dir_size(path: &Path) -> anyhow::Result<u64> {
    let mut total = 0;
    if !path.exists() {
        return Ok(0);
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Background task sampling a usage source into a capacity gate.
pub struct DiskUsageWatcher {
    handle: JoinHandle<()>,
}

impl DiskUsageWatcher {
    /// Spawns the watcher on its own task, sampling every `interval`.
    pub fn spawn(
        source: Arc<dyn DiskUsageSource>,
        gate: CapacityGate,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match source.usage_bytes().await {
                    Ok(usage) => {
                        debug!(usage, "Sampled shadow storage usage");
                        gate.record_usage(usage);
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to sample shadow storage usage");
                    }
                }
            }
        });
        Self { handle }
    }

    /// Stops the watcher.
    pub fn stop(self) {
        self.handle.abort();
    }
}
