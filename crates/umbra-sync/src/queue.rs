//! Bounded coalescing request queue.
//!
//! A FIFO of [`SyncRequest`]s keyed by shadow identity. At most one entry
//! exists per identity: inserting a request whose identity is already
//! queued merges the two through the request merger, and the merged entry
//! keeps the original queue position. Capacity bounds only externally
//! submitted requests; retry re-queues bypass the bound so head-of-line
//! retries are never lost.
//!
//! Waiting is implemented with a `std` mutex around the queue state and
//! two [`Notify`] handles; the mutex is never held across an await point.
//! Closing the queue wakes every waiter: `put` fails with
//! [`SyncError::Interrupted`] and `poll` returns `None`, which consumers
//! treat as the stop signal. Entries survive a close and are drained after
//! the queue is reopened.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;

use umbra_core::{ShadowIdentity, SyncDirection, SyncError, SyncRequest};

use crate::merger::merge_requests;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct QueueInner {
    /// Identity order of arrival; may contain stale slots for identities
    /// whose entry was removed or coalesced away.
    order: VecDeque<ShadowIdentity>,
    /// The single pending request per identity.
    pending: HashMap<ShadowIdentity, SyncRequest>,
    /// Closed queues reject puts and unblock pollers.
    closed: bool,
}

/// Bounded FIFO with per-identity coalescing.
#[derive(Debug)]
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    direction: SyncDirection,
    not_empty: Notify,
    not_full: Notify,
}

impl RequestQueue {
    /// Creates a queue with the given capacity and merge direction.
    pub fn new(capacity: usize, direction: SyncDirection) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity,
            direction,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Creates a queue with the default capacity.
    pub fn with_direction(direction: SyncDirection) -> Self {
        Self::new(DEFAULT_CAPACITY, direction)
    }

    /// Inserts a request, waiting while the queue is full.
    ///
    /// If the identity already has a queued entry the two requests are
    /// merged in place and no capacity is consumed. Fails with
    /// [`SyncError::Interrupted`] when the queue is closed.
    pub async fn put(&self, mut request: SyncRequest) -> Result<(), SyncError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return Err(SyncError::Interrupted);
                }
                match self.try_insert(&mut inner, request) {
                    Ok(()) => {
                        self.not_empty.notify_one();
                        return Ok(());
                    }
                    // Queue is full; take the request back and wait.
                    Err(rejected) => request = rejected,
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Removes and returns the head request, waiting while the queue is
    /// empty. Returns `None` once the queue is closed.
    pub async fn poll(&self) -> Option<SyncRequest> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return None;
                }
                if let Some(request) = Self::pop_head(&mut inner) {
                    self.not_full.notify_one();
                    return Some(request);
                }
            }
            self.not_empty.notified().await;
        }
    }

    /// Removes and returns the head request without waiting.
    pub fn try_poll(&self) -> Option<SyncRequest> {
        let mut inner = self.inner.lock().unwrap();
        let request = Self::pop_head(&mut inner);
        if request.is_some() {
            self.not_full.notify_one();
        }
        request
    }

    /// Atomically inserts `request` (with coalescing) and removes the head
    /// request to execute next.
    ///
    /// Used by the strategies to re-queue a failing request without losing
    /// head-of-line progress. With `block_if_full` false the insert ignores
    /// the capacity bound; with it true the call waits for space like
    /// [`put`](Self::put).
    pub async fn offer_and_take(
        &self,
        mut request: SyncRequest,
        block_if_full: bool,
    ) -> Result<SyncRequest, SyncError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return Err(SyncError::Interrupted);
                }
                let inserted = if block_if_full {
                    self.try_insert(&mut inner, request)
                } else {
                    self.insert_unbounded(&mut inner, request);
                    Ok(())
                };
                match inserted {
                    Ok(()) => {
                        // The queue cannot be empty right after an insert.
                        if let Some(next) = Self::pop_head(&mut inner) {
                            return Ok(next);
                        }
                        return Err(SyncError::Interrupted);
                    }
                    Err(rejected) => request = rejected,
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Inserts a request at the head of the queue, bypassing the capacity
    /// bound. Used when a failed request mutates into a full sync that has
    /// to run before anything else for that identity.
    pub fn put_front(&self, request: SyncRequest) {
        let mut inner = self.inner.lock().unwrap();
        let key = request.identity().clone();
        let merged = match inner.pending.remove(&key) {
            Some(existing) => merge_requests(existing, request, self.direction),
            None => request,
        };
        inner.order.push_front(key.clone());
        inner.pending.insert(key, merged);
        self.not_empty.notify_one();
    }

    /// Removes the pending request for an identity, if any.
    pub fn remove(&self, id: &ShadowIdentity) -> Option<SyncRequest> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.pending.remove(id);
        if removed.is_some() {
            // The stale order slot is skipped by the next poll.
            self.not_full.notify_one();
        }
        removed
    }

    /// Drops every queued request.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.order.clear();
        inner.pending.clear();
        self.not_full.notify_waiters();
    }

    /// Number of slots left before `put` blocks.
    pub fn remaining_capacity(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        self.capacity.saturating_sub(inner.pending.len())
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().pending.is_empty()
    }

    /// Closes the queue: pollers return `None`, putters fail, waiters wake.
    /// Queued entries are kept for the next open.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Reopens a closed queue.
    pub fn open(&self) {
        self.inner.lock().unwrap().closed = false;
        self.not_empty.notify_waiters();
    }

    /// True when the queue is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Coalescing insert honoring the capacity bound. Returns the request
    /// back when the queue is full.
    fn try_insert(
        &self,
        inner: &mut QueueInner,
        request: SyncRequest,
    ) -> Result<(), SyncRequest> {
        let key = request.identity().clone();
        if let Some(existing) = inner.pending.remove(&key) {
            let merged = merge_requests(existing, request, self.direction);
            trace!(identity = %key, "Coalesced request in place");
            inner.pending.insert(key, merged);
            return Ok(());
        }
        if inner.pending.len() >= self.capacity {
            return Err(request);
        }
        inner.order.push_back(key.clone());
        inner.pending.insert(key, request);
        Ok(())
    }

    /// Coalescing insert that ignores the capacity bound.
    fn insert_unbounded(&self, inner: &mut QueueInner, request: SyncRequest) {
        let key = request.identity().clone();
        let merged = match inner.pending.remove(&key) {
            Some(existing) => {
                trace!(identity = %key, "Coalesced request in place");
                merge_requests(existing, request, self.direction)
            }
            None => {
                inner.order.push_back(key.clone());
                request
            }
        };
        inner.pending.insert(key, merged);
    }

    fn pop_head(inner: &mut QueueInner) -> Option<SyncRequest> {
        while let Some(id) = inner.order.pop_front() {
            if let Some(request) = inner.pending.remove(&id) {
                return Some(request);
            }
            // Stale slot left behind by remove() or put_front coalescing.
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn identity(name: &str) -> ShadowIdentity {
        ShadowIdentity::parse("thing", name).unwrap()
    }

    fn update(name: &str, payload: serde_json::Value, version: u64) -> SyncRequest {
        SyncRequest::LocalUpdate {
            identity: identity(name),
            payload,
            expected_local_version: version,
        }
    }

    fn queue(capacity: usize) -> RequestQueue {
        RequestQueue::new(capacity, SyncDirection::BetweenDeviceAndCloud)
    }

    #[tokio::test]
    async fn test_fifo_across_identities() {
        let q = queue(8);
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();
        q.put(update("b", json!({"reported": {}}), 1)).await.unwrap();
        q.put(update("c", json!({"reported": {}}), 1)).await.unwrap();

        assert_eq!(q.poll().await.unwrap().identity(), &identity("a"));
        assert_eq!(q.poll().await.unwrap().identity(), &identity("b"));
        assert_eq!(q.poll().await.unwrap().identity(), &identity("c"));
    }

    #[tokio::test]
    async fn test_coalescing_preserves_position_and_capacity() {
        let q = queue(8);
        q.put(update("a", json!({"reported": {"x": 1}}), 1))
            .await
            .unwrap();
        q.put(update("b", json!({"reported": {}}), 1)).await.unwrap();
        let before = q.remaining_capacity();

        // Second update for "a" coalesces; capacity is unchanged.
        q.put(update("a", json!({"reported": {"y": 2}}), 2))
            .await
            .unwrap();
        assert_eq!(q.remaining_capacity(), before);
        assert_eq!(q.len(), 2);

        // "a" still drains first, with the merged payload.
        match q.poll().await.unwrap() {
            SyncRequest::LocalUpdate {
                identity: id,
                payload,
                expected_local_version,
            } => {
                assert_eq!(id, identity("a"));
                assert_eq!(payload, json!({"reported": {"x": 1, "y": 2}}));
                assert_eq!(expected_local_version, 2);
            }
            other => panic!("unexpected head: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_put_blocks_when_full_until_poll() {
        let q = Arc::new(queue(1));
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();

        let q2 = q.clone();
        let blocked = tokio::spawn(async move {
            q2.put(update("b", json!({"reported": {}}), 1)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        // Draining one entry releases the putter.
        q.poll().await.unwrap();
        blocked.await.unwrap().unwrap();
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_still_coalesces_same_identity() {
        let q = queue(1);
        q.put(update("a", json!({"reported": {"x": 1}}), 1))
            .await
            .unwrap();
        // Same identity merges even though the queue is at capacity.
        q.put(update("a", json!({"reported": {"y": 2}}), 2))
            .await
            .unwrap();
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_close_unblocks_poller_with_none() {
        let q = Arc::new(queue(4));
        let q2 = q.clone();
        let poller = tokio::spawn(async move { q2.poll().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        assert_eq!(poller.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_fails_when_closed() {
        let q = queue(4);
        q.close();
        let err = q
            .put(update("a", json!({"reported": {}}), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Interrupted));
    }

    #[tokio::test]
    async fn test_entries_survive_close_and_reopen() {
        let q = queue(4);
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();
        q.close();
        assert_eq!(q.len(), 1);

        q.open();
        assert_eq!(q.poll().await.unwrap().identity(), &identity("a"));
    }

    #[tokio::test]
    async fn test_offer_and_take_returns_head() {
        let q = queue(4);
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();

        // Re-queuing "b" returns "a", the head.
        let next = q
            .offer_and_take(update("b", json!({"reported": {}}), 1), false)
            .await
            .unwrap();
        assert_eq!(next.identity(), &identity("a"));
        assert_eq!(q.len(), 1);

        let next = q
            .offer_and_take(update("c", json!({"reported": {}}), 1), false)
            .await
            .unwrap();
        assert_eq!(next.identity(), &identity("b"));
    }

    #[tokio::test]
    async fn test_offer_and_take_bypasses_capacity() {
        let q = queue(1);
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();

        // Unblocking insert on a full queue: "b" goes in, "a" comes out.
        let next = q
            .offer_and_take(update("b", json!({"reported": {}}), 1), false)
            .await
            .unwrap();
        assert_eq!(next.identity(), &identity("a"));
    }

    #[tokio::test]
    async fn test_put_front_executes_before_fifo_order() {
        let q = queue(4);
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();
        q.put(update("b", json!({"reported": {}}), 1)).await.unwrap();

        q.put_front(SyncRequest::FullShadowSync {
            identity: identity("z"),
        });

        assert_eq!(q.poll().await.unwrap().identity(), &identity("z"));
        assert_eq!(q.poll().await.unwrap().identity(), &identity("a"));
    }

    #[tokio::test]
    async fn test_put_front_coalesces_and_moves_to_head() {
        let q = queue(4);
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();
        q.put(update("b", json!({"reported": {}}), 1)).await.unwrap();

        q.put_front(SyncRequest::FullShadowSync {
            identity: identity("b"),
        });

        // "b" was pulled to the head and absorbed the full sync.
        let head = q.poll().await.unwrap();
        assert_eq!(head, SyncRequest::FullShadowSync { identity: identity("b") });
        assert_eq!(q.poll().await.unwrap().identity(), &identity("a"));
        assert!(q.try_poll().is_none());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let q = queue(4);
        q.put(update("a", json!({"reported": {}}), 1)).await.unwrap();
        q.put(update("b", json!({"reported": {}}), 1)).await.unwrap();

        assert!(q.remove(&identity("a")).is_some());
        assert!(q.remove(&identity("a")).is_none());
        assert_eq!(q.len(), 1);

        // The stale order slot for "a" is skipped.
        assert_eq!(q.poll().await.unwrap().identity(), &identity("b"));

        q.put(update("c", json!({"reported": {}}), 1)).await.unwrap();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.remaining_capacity(), 4);
    }
}
