//! Durable email job queue.
//!
//! Jobs are pushed to a Redis list and leased by workers through a second
//! list, giving at-least-once delivery: a worker crash leaves the job on
//! the lease list, from where startup recovery requeues it. Terminal
//! failures are retained for operator inspection, never silently dropped.

pub mod worker;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::error::AppError;

pub const SEND_VERIFICATION_EMAIL: &str = "SEND_VERIFICATION_EMAIL";

const QUEUE_KEY: &str = "email:queue";
const ACTIVE_KEY: &str = "email:active";
const FAILED_KEY: &str = "email:failed";

/// A queued email job. `attempt` counts deliveries already tried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailJob {
    pub kind: String,
    pub user_id: Uuid,
    pub email: String,
    pub otp: String,
    #[serde(default)]
    pub attempt: u32,
}

impl EmailJob {
    pub fn verification(user_id: Uuid, email: String, otp: String) -> Self {
        Self {
            kind: SEND_VERIFICATION_EMAIL.to_string(),
            user_id,
            email,
            otp,
            attempt: 0,
        }
    }
}

/// A job currently held by a worker. `payload` is the exact serialized
/// form sitting on the lease list, needed to release it.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: EmailJob,
    pub payload: String,
}

#[async_trait]
pub trait EmailQueue: Send + Sync {
    /// Durably record a job; returns once it is on the queue.
    async fn enqueue(&self, job: &EmailJob) -> Result<(), AppError>;

    /// Take the next job, moving it to the lease list. Returns `None` when
    /// the queue stays empty for the poll interval.
    async fn lease(&self) -> Result<Option<LeasedJob>, AppError>;

    /// Release a finished job from the lease list.
    async fn complete(&self, lease: &LeasedJob) -> Result<(), AppError>;

    /// Retain a job in the terminal-failed list and release its lease.
    async fn fail_terminal(&self, lease: &LeasedJob) -> Result<(), AppError>;

    /// Move jobs abandoned on the lease list back onto the queue.
    async fn requeue_stale(&self) -> Result<usize, AppError>;
}

/// Redis list-backed queue.
#[derive(Clone)]
pub struct RedisEmailQueue {
    manager: ConnectionManager,
}

impl RedisEmailQueue {
    pub async fn new(config: &RedisConfig) -> Result<Self, AppError> {
        let client = Client::open(config.url.clone())?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            AppError::Transient(anyhow::anyhow!("Failed to connect to Redis: {e}"))
        })?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl EmailQueue for RedisEmailQueue {
    async fn enqueue(&self, job: &EmailJob) -> Result<(), AppError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Job encode error: {e}")))?;

        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Transient(anyhow::anyhow!("Failed to enqueue job: {e}")))?;

        tracing::debug!(kind = %job.kind, user_id = %job.user_id, "Email job enqueued");
        Ok(())
    }

    async fn lease(&self) -> Result<Option<LeasedJob>, AppError> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(QUEUE_KEY)
            .arg(ACTIVE_KEY)
            .arg(1.0)
            .query_async(&mut conn)
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<EmailJob>(&payload) {
            Ok(job) => Ok(Some(LeasedJob { job, payload })),
            Err(e) => {
                // Undecodable payloads go straight to the failed list.
                tracing::warn!(error = %e, "Dropping malformed email job");
                redis::pipe()
                    .cmd("LPUSH")
                    .arg(FAILED_KEY)
                    .arg(&payload)
                    .ignore()
                    .cmd("LREM")
                    .arg(ACTIVE_KEY)
                    .arg(1)
                    .arg(&payload)
                    .ignore()
                    .query_async::<_, ()>(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, lease: &LeasedJob) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("LREM")
            .arg(ACTIVE_KEY)
            .arg(1)
            .arg(&lease.payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail_terminal(&self, lease: &LeasedJob) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::pipe()
            .cmd("LPUSH")
            .arg(FAILED_KEY)
            .arg(&lease.payload)
            .ignore()
            .cmd("LREM")
            .arg(ACTIVE_KEY)
            .arg(1)
            .arg(&lease.payload)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn requeue_stale(&self) -> Result<usize, AppError> {
        let mut conn = self.manager.clone();
        let mut moved = 0;
        loop {
            let payload: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(ACTIVE_KEY)
                .arg(QUEUE_KEY)
                .query_async(&mut conn)
                .await?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            tracing::info!(count = moved, "Requeued abandoned email jobs");
        }
        Ok(moved)
    }
}

/// In-memory queue for tests.
#[derive(Default)]
pub struct MemoryEmailQueue {
    pub queued: Mutex<VecDeque<String>>,
    pub active: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<String>>,
}

impl MemoryEmailQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn failed_len(&self) -> usize {
        self.failed.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Decode the most recently queued job without consuming it.
    pub fn last_queued(&self) -> Option<EmailJob> {
        self.queued
            .lock()
            .ok()?
            .front()
            .and_then(|p| serde_json::from_str(p).ok())
    }
}

#[async_trait]
impl EmailQueue for MemoryEmailQueue {
    async fn enqueue(&self, job: &EmailJob) -> Result<(), AppError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Job encode error: {e}")))?;
        self.queued
            .lock()
            .map_err(lock_err)?
            .push_front(payload);
        Ok(())
    }

    async fn lease(&self) -> Result<Option<LeasedJob>, AppError> {
        let payload = self.queued.lock().map_err(lock_err)?.pop_back();
        let Some(payload) = payload else {
            return Ok(None);
        };
        self.active.lock().map_err(lock_err)?.push(payload.clone());

        let job = serde_json::from_str(&payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Job decode error: {e}")))?;
        Ok(Some(LeasedJob { job, payload }))
    }

    async fn complete(&self, lease: &LeasedJob) -> Result<(), AppError> {
        self.active
            .lock()
            .map_err(lock_err)?
            .retain(|p| p != &lease.payload);
        Ok(())
    }

    async fn fail_terminal(&self, lease: &LeasedJob) -> Result<(), AppError> {
        self.failed
            .lock()
            .map_err(lock_err)?
            .push(lease.payload.clone());
        self.active
            .lock()
            .map_err(lock_err)?
            .retain(|p| p != &lease.payload);
        Ok(())
    }

    async fn requeue_stale(&self) -> Result<usize, AppError> {
        let mut active = self.active.lock().map_err(lock_err)?;
        let mut queued = self.queued.lock().map_err(lock_err)?;
        let moved = active.len();
        for payload in active.drain(..) {
            queued.push_front(payload);
        }
        Ok(moved)
    }
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> AppError {
    AppError::Internal(anyhow::anyhow!("Queue mutex poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_schema_round_trips() {
        let job = EmailJob::verification(Uuid::new_v4(), "a@example.com".to_string(), "012345".to_string());
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("SEND_VERIFICATION_EMAIL"));

        let decoded: EmailJob = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn attempt_defaults_to_zero() {
        let json = format!(
            r#"{{"kind":"SEND_VERIFICATION_EMAIL","userId":null,"user_id":"{}","email":"a@example.com","otp":"000001"}}"#,
            Uuid::new_v4()
        );
        // Unknown fields are ignored, missing attempt defaults.
        let decoded: EmailJob = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.attempt, 0);
    }

    #[tokio::test]
    async fn lease_and_complete_drain_the_queue() {
        let queue = MemoryEmailQueue::new();
        let job = EmailJob::verification(Uuid::new_v4(), "a@example.com".to_string(), "111111".to_string());

        queue.enqueue(&job).await.unwrap();
        assert_eq!(queue.queued_len(), 1);

        let lease = queue.lease().await.unwrap().unwrap();
        assert_eq!(lease.job, job);
        assert_eq!(queue.queued_len(), 0);

        queue.complete(&lease).await.unwrap();
        assert!(queue.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn requeue_stale_recovers_abandoned_leases() {
        let queue = MemoryEmailQueue::new();
        let job = EmailJob::verification(Uuid::new_v4(), "a@example.com".to_string(), "222222".to_string());

        queue.enqueue(&job).await.unwrap();
        let _abandoned = queue.lease().await.unwrap().unwrap();
        assert_eq!(queue.queued_len(), 0);

        let moved = queue.requeue_stale().await.unwrap();
        assert_eq!(moved, 1);
        assert_eq!(queue.queued_len(), 1);
    }
}
