//! Email delivery worker pool.
//!
//! A fixed number of workers lease jobs, retry transient failures with
//! exponential backoff and park jobs that exhaust their attempts on the
//! terminal-failed list.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{EmailQueue, LeasedJob, SEND_VERIFICATION_EMAIL};
use crate::config::EmailWorkerConfig;
use crate::error::AppError;
use crate::services::email::EmailProvider;

pub struct EmailWorkerPool {
    queue: Arc<dyn EmailQueue>,
    mailer: Arc<dyn EmailProvider>,
    config: EmailWorkerConfig,
    shutdown: CancellationToken,
}

impl EmailWorkerPool {
    pub fn new(
        queue: Arc<dyn EmailQueue>,
        mailer: Arc<dyn EmailProvider>,
        config: EmailWorkerConfig,
    ) -> Self {
        Self {
            queue,
            mailer,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Recover jobs left on the lease list by a previous run, then spawn
    /// the workers.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, AppError> {
        self.queue.requeue_stale().await?;

        let mut handles = Vec::with_capacity(self.config.concurrency);
        for worker_id in 0..self.config.concurrency {
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                pool.run_worker(worker_id).await;
            }));
        }
        tracing::info!(workers = self.config.concurrency, "Email worker pool started");
        Ok(handles)
    }

    async fn run_worker(&self, worker_id: usize) {
        loop {
            let lease = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                lease = self.queue.lease() => lease,
            };

            match lease {
                Ok(Some(lease)) => {
                    if let Err(e) = self.process(lease).await {
                        tracing::error!(worker_id, error = %e, "Failed to settle email job");
                    }
                }
                Ok(None) => {
                    // Idle poll pause; the Redis lease already blocks, this
                    // keeps non-blocking backends from spinning.
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "Email queue unavailable, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        tracing::debug!(worker_id, "Email worker stopped");
    }

    /// Run a leased job to a settled state: completed, terminally failed,
    /// or left on the lease list when shutdown interrupts a retry wait.
    async fn process(&self, lease: LeasedJob) -> Result<(), AppError> {
        if lease.job.kind != SEND_VERIFICATION_EMAIL {
            tracing::warn!(kind = %lease.job.kind, "Dropping email job of unknown kind");
            return self.queue.complete(&lease).await;
        }

        let mut attempt = lease.job.attempt;
        loop {
            match self
                .mailer
                .send_verification_email(&lease.job.email, &lease.job.otp)
                .await
            {
                Ok(()) => {
                    tracing::info!(user_id = %lease.job.user_id, attempt, "Verification email delivered");
                    return self.queue.complete(&lease).await;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts {
                        tracing::error!(
                            user_id = %lease.job.user_id,
                            attempts = attempt,
                            error = %e,
                            "Email job exhausted its attempts"
                        );
                        return self.queue.fail_terminal(&lease).await;
                    }

                    let delay = retry_delay(self.config.backoff_base_secs, attempt);
                    tracing::warn!(
                        user_id = %lease.job.user_id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Email delivery failed, will retry"
                    );

                    tokio::select! {
                        // Leave the job leased; startup recovery requeues it.
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Delay before retry `attempt`: base, 2x base, 4x base, ... The exponent
/// is capped so an arbitrarily large configured attempt limit cannot
/// overflow the shift.
fn retry_delay(base_secs: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_secs(base_secs.saturating_mul(1u64 << exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EmailJob, MemoryEmailQueue};
    use crate::services::email::MockEmailService;
    use uuid::Uuid;

    fn test_config() -> EmailWorkerConfig {
        EmailWorkerConfig {
            concurrency: 1,
            max_attempts: 5,
            backoff_base_secs: 0,
        }
    }

    fn pool_with(mailer: MockEmailService) -> (Arc<MemoryEmailQueue>, Arc<MockEmailService>, EmailWorkerPool) {
        let queue = Arc::new(MemoryEmailQueue::new());
        let mailer = Arc::new(mailer);
        let pool = EmailWorkerPool::new(
            Arc::clone(&queue) as Arc<dyn EmailQueue>,
            Arc::clone(&mailer) as Arc<dyn EmailProvider>,
            test_config(),
        );
        (queue, mailer, pool)
    }

    async fn enqueue_and_lease(queue: &MemoryEmailQueue) -> LeasedJob {
        let job = EmailJob::verification(Uuid::new_v4(), "a@example.com".to_string(), "123456".to_string());
        queue.enqueue(&job).await.unwrap();
        queue.lease().await.unwrap().unwrap()
    }

    #[test]
    fn retry_delay_doubles_from_the_base() {
        assert_eq!(retry_delay(1, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(1, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(1, 3), Duration::from_secs(4));
        assert_eq!(retry_delay(2, 4), Duration::from_secs(16));
    }

    #[test]
    fn retry_delay_is_bounded_for_large_attempt_counts() {
        // High attempt limits must not overflow the exponent.
        assert_eq!(retry_delay(1, 80), Duration::from_secs(1 << 16));
        assert_eq!(retry_delay(u64::MAX, u32::MAX), Duration::from_secs(u64::MAX));
        assert_eq!(retry_delay(0, 100), Duration::ZERO);
    }

    #[tokio::test]
    async fn delivers_and_completes_on_first_attempt() {
        let (queue, mailer, pool) = pool_with(MockEmailService::new());
        let lease = enqueue_and_lease(&queue).await;

        pool.process(lease).await.unwrap();

        assert_eq!(mailer.sent_count(), 1);
        assert!(queue.active.lock().unwrap().is_empty());
        assert_eq!(queue.failed_len(), 0);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_delivers() {
        let (queue, mailer, pool) = pool_with(MockEmailService::failing_times(2));
        let lease = enqueue_and_lease(&queue).await;

        pool.process(lease).await.unwrap();

        assert_eq!(mailer.sent_count(), 1);
        assert_eq!(queue.failed_len(), 0);
        assert!(queue.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_job_is_retained_on_failed_list() {
        let (queue, mailer, pool) = pool_with(MockEmailService::failing_times(10));
        let lease = enqueue_and_lease(&queue).await;

        pool.process(lease).await.unwrap();

        assert_eq!(mailer.sent_count(), 0);
        assert_eq!(queue.failed_len(), 1);
        assert!(queue.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_kind_is_dropped_without_delivery() {
        let (queue, mailer, pool) = pool_with(MockEmailService::new());
        let job = EmailJob {
            kind: "SEND_NEWSLETTER".to_string(),
            user_id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            otp: String::new(),
            attempt: 0,
        };
        queue.enqueue(&job).await.unwrap();
        let lease = queue.lease().await.unwrap().unwrap();

        pool.process(lease).await.unwrap();

        assert_eq!(mailer.sent_count(), 0);
        assert_eq!(queue.failed_len(), 0);
        assert!(queue.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_requeues_stale_leases_before_spawning() {
        let (queue, _mailer, pool) = pool_with(MockEmailService::new());
        let _abandoned = enqueue_and_lease(&queue).await;
        assert_eq!(queue.queued_len(), 0);

        let pool = Arc::new(pool);
        let handles = pool.start().await.unwrap();

        // Give the worker time to pick the recovered job back up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown_token().cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(queue.active.lock().unwrap().is_empty());
        assert_eq!(queue.failed_len(), 0);
    }
}
