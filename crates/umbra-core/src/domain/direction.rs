//! Synchronization direction policy.

use serde::{Deserialize, Serialize};

/// Which sides of a shadow may be written during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncDirection {
    /// Changes flow both ways (default).
    #[default]
    BetweenDeviceAndCloud,
    /// Only the device pushes to the cloud; cloud-observed changes never
    /// touch the local store.
    DeviceToCloud,
    /// Only cloud changes are applied locally; local changes are never
    /// pushed.
    CloudToDevice,
}

impl SyncDirection {
    /// True when cloud-observed changes may be written to the local store.
    pub fn allows_local_writes(&self) -> bool {
        !matches!(self, SyncDirection::DeviceToCloud)
    }

    /// True when local changes may be pushed to the cloud.
    pub fn allows_cloud_writes(&self) -> bool {
        !matches!(self, SyncDirection::CloudToDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_bidirectional() {
        assert_eq!(SyncDirection::default(), SyncDirection::BetweenDeviceAndCloud);
    }

    #[test]
    fn test_gating() {
        assert!(SyncDirection::BetweenDeviceAndCloud.allows_local_writes());
        assert!(SyncDirection::BetweenDeviceAndCloud.allows_cloud_writes());
        assert!(!SyncDirection::DeviceToCloud.allows_local_writes());
        assert!(SyncDirection::DeviceToCloud.allows_cloud_writes());
        assert!(SyncDirection::CloudToDevice.allows_local_writes());
        assert!(!SyncDirection::CloudToDevice.allows_cloud_writes());
    }

    #[test]
    fn test_serde_names() {
        let parsed: SyncDirection = serde_json::from_str("\"deviceToCloud\"").unwrap();
        assert_eq!(parsed, SyncDirection::DeviceToCloud);
        assert_eq!(
            serde_json::to_string(&SyncDirection::BetweenDeviceAndCloud).unwrap(),
            "\"betweenDeviceAndCloud\""
        );
    }
}
