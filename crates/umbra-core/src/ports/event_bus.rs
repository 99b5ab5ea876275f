//! Local event bus port.
//!
//! Every accepted or rejected shadow operation, every recomputed delta, and
//! (when enabled) every sync status change is published as a
//! [`ShadowEvent`] on a local pub/sub bus for co-located components.
//!
//! ## Design Notes
//!
//! - Publication is fire-and-forget; callers log failures and move on, so
//!   the trait returns `anyhow::Result` rather than a domain error.
//! - Events carry epoch-seconds timestamps and echo the client token of
//!   the triggering request when one was supplied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ClientToken, ShadowIdentity};

/// Which local operation an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowOperation {
    /// Read of one document.
    Get,
    /// Update of one document.
    Update,
    /// Deletion of one document.
    Delete,
    /// Listing of a thing's named shadows.
    List,
}

/// An event published on the local bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShadowEvent {
    /// An operation was accepted and applied.
    Accepted {
        /// Affected shadow.
        identity: ShadowIdentity,
        /// The accepted operation.
        operation: ShadowOperation,
        /// Epoch seconds.
        timestamp: i64,
        /// Echoed client token, when supplied.
        client_token: Option<ClientToken>,
    },
    /// An operation was rejected.
    Rejected {
        /// Affected shadow.
        identity: ShadowIdentity,
        /// The rejected operation.
        operation: ShadowOperation,
        /// Epoch seconds.
        timestamp: i64,
        /// Echoed client token, when supplied.
        client_token: Option<ClientToken>,
        /// Human-readable failure description.
        error: String,
    },
    /// An accepted update produced a non-empty delta.
    Delta {
        /// Affected shadow.
        identity: ShadowIdentity,
        /// The recomputed `delta` branch.
        delta: Value,
        /// Document version carrying the delta.
        version: u64,
        /// Epoch seconds.
        timestamp: i64,
    },
    /// An accepted update changed the document.
    Documents {
        /// Affected shadow.
        identity: ShadowIdentity,
        /// Document before the update, absent for a first write.
        previous: Option<Value>,
        /// Document after the update.
        current: Value,
        /// Epoch seconds.
        timestamp: i64,
    },
    /// Sync status for one identity (published when enabled).
    SyncStatus {
        /// Affected shadow.
        identity: ShadowIdentity,
        /// True when local and cloud agree.
        in_sync: bool,
        /// Last known cloud version.
        cloud_version: u64,
        /// Last synced local version.
        local_version: u64,
        /// Epoch seconds.
        timestamp: i64,
    },
}

impl ShadowEvent {
    /// The identity the event refers to.
    pub fn identity(&self) -> &ShadowIdentity {
        match self {
            ShadowEvent::Accepted { identity, .. }
            | ShadowEvent::Rejected { identity, .. }
            | ShadowEvent::Delta { identity, .. }
            | ShadowEvent::Documents { identity, .. }
            | ShadowEvent::SyncStatus { identity, .. } => identity,
        }
    }
}

/// Port trait for the local pub/sub bus.
#[async_trait::async_trait]
pub trait ShadowEventBus: Send + Sync {
    /// Publishes one event. Failures are logged by callers, never fatal.
    async fn publish(&self, event: ShadowEvent) -> anyhow::Result<()>;
}

/// Bus that drops every event; useful in tests and minimal deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventBus;

#[async_trait::async_trait]
impl ShadowEventBus for NullEventBus {
    async fn publish(&self, _event: ShadowEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
