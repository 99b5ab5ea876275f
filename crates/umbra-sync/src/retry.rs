//! Request execution with classified retries.
//!
//! The retryer wraps a single request execution and turns every failure
//! into an explicit outcome the strategy pattern-matches on, instead of
//! letting errors bubble as control flow:
//!
//! - transient failures are retried in place with exponential backoff and
//!   jitter, then handed back for re-queueing once attempts are exhausted;
//! - version conflicts mutate the request into a full synchronization;
//! - invalid or unauthorized requests are logged and dropped;
//! - interruption hands the in-flight request back for reinstatement.
//!
//! Retry attempts are not persisted. After a restart, pending retries are
//! rediscovered by the full synchronization on resume.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use umbra_core::{ErrorClass, SyncError, SyncRequest};

/// Backoff and attempt policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per execution, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
    /// Relative jitter applied to every delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

/// What the strategy should do with a request after the retryer is done
/// with it.
#[derive(Debug)]
pub enum RetryOutcome {
    /// The request executed successfully.
    Completed,
    /// Attempts are exhausted on transient failures; re-queue the request
    /// without losing head-of-line progress.
    Requeue(SyncRequest),
    /// A conflict was detected; the carried request is the full
    /// synchronization to run at the head of the queue.
    MutateToFullSync(SyncRequest),
    /// The request is invalid or the failure unrecoverable; it was logged
    /// and dropped.
    Dropped,
    /// Execution was interrupted; reinstate the request and stop.
    Interrupted(SyncRequest),
}

/// Executes requests with classified retries.
#[derive(Debug, Clone, Default)]
pub struct Retryer {
    config: RetryConfig,
}

impl Retryer {
    /// Creates a retryer with the given policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The backoff delay before attempt `attempt + 1`, with jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_delay);
        let jitter_factor =
            rand::thread_rng().gen_range(1.0 - self.config.jitter..=1.0 + self.config.jitter);
        exp.mul_f64(jitter_factor)
    }

    /// Runs `execute` for `request`, retrying transient failures in place.
    pub async fn run<F, Fut>(&self, request: SyncRequest, mut execute: F) -> RetryOutcome
    where
        F: FnMut(SyncRequest) -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let identity = request.identity().clone();
        let kind = request.kind();

        for attempt in 0..self.config.max_attempts {
            match execute(request.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(%identity, kind, attempt, "Sync request succeeded after retry");
                    }
                    return RetryOutcome::Completed;
                }
                Err(err) => match err.class() {
                    ErrorClass::Retryable => {
                        if attempt + 1 < self.config.max_attempts {
                            let delay = self.backoff_delay(attempt);
                            warn!(
                                %identity,
                                kind,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Transient sync failure, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        } else {
                            warn!(
                                %identity,
                                kind,
                                attempts = self.config.max_attempts,
                                error = %err,
                                "Retry attempts exhausted, re-queueing request"
                            );
                            return RetryOutcome::Requeue(request);
                        }
                    }
                    ErrorClass::Conflict => {
                        info!(
                            %identity,
                            kind,
                            error = %err,
                            "Sync conflict, mutating request to full synchronization"
                        );
                        return RetryOutcome::MutateToFullSync(request.into_full_sync());
                    }
                    ErrorClass::Rejected => {
                        warn!(%identity, kind, error = %err, "Dropping rejected sync request");
                        return RetryOutcome::Dropped;
                    }
                    ErrorClass::Fatal => {
                        error!(%identity, kind, error = %err, "Dropping sync request after fatal failure");
                        return RetryOutcome::Dropped;
                    }
                    ErrorClass::Interrupted => {
                        debug!(%identity, kind, "Sync request interrupted");
                        return RetryOutcome::Interrupted(request);
                    }
                },
            }
        }

        RetryOutcome::Requeue(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use umbra_core::ShadowIdentity;

    fn request() -> SyncRequest {
        SyncRequest::FullShadowSync {
            identity: ShadowIdentity::parse("thing", "").unwrap(),
        }
    }

    fn fast_retryer() -> Retryer {
        Retryer::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
        })
    }

    #[tokio::test]
    async fn test_success_completes_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let outcome = fast_retryer()
            .run(request(), move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_then_requeue() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let outcome = fast_retryer()
            .run(request(), move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Retryable("timeout".into())) }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Requeue(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovery_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let outcome = fast_retryer()
            .run(request(), move |_| {
                let n = calls2.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SyncError::Retryable("first attempt fails".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conflict_mutates_to_full_sync() {
        let outcome = fast_retryer()
            .run(request(), |_| async {
                Err(SyncError::CloudConflict("stale version".into()))
            })
            .await;
        match outcome {
            RetryOutcome::MutateToFullSync(SyncRequest::FullShadowSync { .. }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_shadow_mutates_to_full_sync() {
        let outcome = fast_retryer()
            .run(request(), |_| async {
                Err(SyncError::UnknownShadow("thing".into()))
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::MutateToFullSync(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_dropped_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let outcome = fast_retryer()
            .run(request(), move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::InvalidArguments("bad".into())) }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Dropped));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_dropped() {
        let outcome = fast_retryer()
            .run(request(), |_| async { Err(SyncError::Fatal("disk".into())) })
            .await;
        assert!(matches!(outcome, RetryOutcome::Dropped));
    }

    #[tokio::test]
    async fn test_interruption_propagates_request() {
        let outcome = fast_retryer()
            .run(request(), |_| async { Err(SyncError::Interrupted) })
            .await;
        assert!(matches!(outcome, RetryOutcome::Interrupted(_)));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retryer = Retryer::new(RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        });
        assert_eq!(retryer.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(retryer.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(retryer.backoff_delay(5), Duration::from_secs(32));
        // Capped at the maximum delay.
        assert_eq!(retryer.backoff_delay(9), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let retryer = Retryer::new(RetryConfig::default());
        for attempt in 0..4 {
            let nominal = Duration::from_secs(1 << attempt);
            let delay = retryer.backoff_delay(attempt);
            assert!(delay >= nominal.mul_f64(0.9));
            assert!(delay <= nominal.mul_f64(1.1));
        }
    }
}
