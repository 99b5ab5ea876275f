//! Disk usage source port.

/// Reports current on-disk byte usage of the shadow store directory.
///
/// The capacity gate samples this on a dedicated task and compares the
/// result against the configured ceiling.
#[async_trait::async_trait]
pub trait DiskUsageSource: Send + Sync {
    /// Current usage in bytes.
    async fn usage_bytes(&self) -> anyhow::Result<u64>;
}
