//! Broadcast-based local event bus and topic rendering.

use tokio::sync::broadcast;
use tracing::trace;

use umbra_core::ports::{ShadowEvent, ShadowEventBus};
use umbra_core::ShadowIdentity;

/// The event families published for a shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// An operation was accepted.
    Accepted,
    /// An operation was rejected.
    Rejected,
    /// A non-empty delta was produced.
    Delta,
    /// The document changed (previous/current pair).
    Documents,
    /// Per-identity sync status.
    SyncStatus,
}

impl TopicKind {
    fn suffix(&self) -> &'static str {
        match self {
            TopicKind::Accepted => "accepted",
            TopicKind::Rejected => "rejected",
            TopicKind::Delta => "delta",
            TopicKind::Documents => "documents",
            TopicKind::SyncStatus => "sync-status",
        }
    }
}

/// Renders the local pub/sub topic for an identity and event family.
///
/// Classic shadows use `things/{thing}/shadow/{suffix}`; named shadows use
/// `things/{thing}/shadow/name/{name}/{suffix}`.
pub fn shadow_topic(identity: &ShadowIdentity, kind: TopicKind) -> String {
    if identity.shadow.is_classic() {
        format!("things/{}/shadow/{}", identity.thing, kind.suffix())
    } else {
        format!(
            "things/{}/shadow/name/{}/{}",
            identity.thing,
            identity.shadow,
            kind.suffix()
        )
    }
}

/// In-process pub/sub bus over a tokio broadcast channel.
///
/// Subscribers that lag are dropped by the channel semantics; shadow events
/// are advisory and co-located consumers re-read the store when they need
/// authoritative state.
#[derive(Debug)]
pub struct LocalEventBus {
    tx: broadcast::Sender<ShadowEvent>,
}

impl LocalEventBus {
    /// Creates a bus buffering up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Opens a subscription receiving every event published after this
    /// call.
    pub fn subscribe(&self) -> broadcast::Receiver<ShadowEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl ShadowEventBus for LocalEventBus {
    async fn publish(&self, event: ShadowEvent) -> anyhow::Result<()> {
        trace!(identity = %event.identity(), "Publishing shadow event");
        // Err only means nobody is subscribed, which is fine.
        let _ = self.tx.send(event);
        Ok(())
    }
}
