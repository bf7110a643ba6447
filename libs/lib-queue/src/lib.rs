//! Durable, priority-and-delay aware job queue shared by the sequence
//! processor, the schedule sweeper, the email-send worker and the inbound
//! event pipeline. Each of those owns one named queue (`sequence-jobs`,
//! `email-jobs`, `contact-jobs`, `thread-watch-jobs`) backed by the same
//! Redis sorted-set implementation; tests use the in-memory backend instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod backends;

pub use backends::{MemoryBackend, RedisBackend};

/// Job execution / backend errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("queue configuration error: {0}")]
    Configuration(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for job execution.
pub type JobResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

/// A unit of work a queue consumer knows how to run.
#[async_trait]
pub trait Job: Send + Sync + Serialize + DeserializeOwned {
    async fn execute(&self) -> JobResult<()>;

    fn job_type(&self) -> &'static str;

    /// Default: 3 attempts before a job is moved to `Dead`.
    fn max_retries(&self) -> u32 {
        3
    }

    /// Default: exponential backoff starting at 1 second, capped at 64s.
    fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(1 << attempt.min(6))
    }
}

/// A job plus the scheduling metadata the backend needs to order and retry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    id: JobId,
    job_type: String,
    payload: serde_json::Value,
    priority: Priority,
    state: JobState,
    attempts: u32,
    max_retries: u32,
    created_at: DateTime<Utc>,
    run_at: DateTime<Utc>,
    last_error: Option<String>,
}

impl JobEntry {
    pub fn new<T: Job>(
        job: T,
        priority: Option<Priority>,
        delay: Option<Duration>,
    ) -> QueueResult<Self> {
        let now = Utc::now();
        let run_at = match delay {
            Some(d) => now
                + chrono::Duration::from_std(d)
                    .map_err(|e| QueueError::Configuration(format!("invalid delay: {e}")))?,
            None => now,
        };

        let job_type = job.job_type().to_string();
        let max_retries = job.max_retries();
        let payload = serde_json::to_value(job)?;

        Ok(JobEntry {
            id: Uuid::new_v4(),
            job_type,
            payload,
            priority: priority.unwrap_or_default(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            run_at,
            last_error: None,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, JobState::Pending | JobState::Failed) && self.run_at <= Utc::now()
    }

    pub async fn execute<T: Job>(&self) -> JobResult<()> {
        let job: T = serde_json::from_value(self.payload.clone())?;
        job.execute().await
    }

    pub(crate) fn mark_processing(&mut self) {
        self.state = JobState::Processing;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.state = JobState::Completed;
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.attempts += 1;
        self.last_error = Some(error);

        if self.attempts >= self.max_retries {
            self.state = JobState::Dead;
        } else {
            self.state = JobState::Failed;
            let delay = Duration::from_secs(1 << self.attempts.min(6));
            let chrono_delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
            self.run_at = Utc::now() + chrono_delay;
        }
    }
}

/// Storage contract a queue implementation must satisfy. One instance owns
/// one named queue (see `RedisBackend::new`'s `queue_name` argument).
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, job: JobEntry) -> QueueResult<JobId>;

    /// Pop the highest-priority job that is ready to run, if any.
    async fn dequeue(&self) -> QueueResult<Option<JobEntry>>;

    async fn complete(&self, job_id: JobId, result: JobResult<()>) -> QueueResult<()>;

    async fn get_job(&self, job_id: JobId) -> QueueResult<Option<JobEntry>>;

    async fn stats(&self) -> QueueResult<QueueStats>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_jobs: u64,
    pub processing_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub dead_jobs: u64,
}

/// Thin, backend-generic handle used by the rest of the crate.
pub struct Queue<B: QueueBackend> {
    backend: B,
}

impl<B: QueueBackend> Queue<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub async fn enqueue<T: Job>(&self, job: T, priority: Option<Priority>) -> QueueResult<JobId> {
        let entry = JobEntry::new(job, priority, None)?;
        self.backend.enqueue(entry).await
    }

    pub async fn enqueue_delayed<T: Job>(
        &self,
        job: T,
        delay: Duration,
        priority: Option<Priority>,
    ) -> QueueResult<JobId> {
        let entry = JobEntry::new(job, priority, Some(delay))?;
        self.backend.enqueue(entry).await
    }

    pub async fn dequeue(&self) -> QueueResult<Option<JobEntry>> {
        self.backend.dequeue().await
    }

    pub async fn complete(&self, job_id: JobId, result: JobResult<()>) -> QueueResult<()> {
        self.backend.complete(job_id, result).await
    }

    pub async fn get_job(&self, job_id: JobId) -> QueueResult<Option<JobEntry>> {
        self.backend.get_job(job_id).await
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.backend.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::MemoryBackend;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestJob {
        message: String,
    }

    #[async_trait]
    impl Job for TestJob {
        async fn execute(&self) -> JobResult<()> {
            Ok(())
        }

        fn job_type(&self) -> &'static str {
            "test"
        }
    }

    #[tokio::test]
    async fn job_entry_starts_pending_and_ready() {
        let job = TestJob {
            message: "hello".into(),
        };
        let entry = JobEntry::new(job, Some(Priority::High), None).unwrap();
        assert_eq!(entry.priority(), Priority::High);
        assert_eq!(entry.state(), &JobState::Pending);
        assert!(entry.is_ready());
    }

    #[tokio::test]
    async fn delayed_job_is_not_ready_immediately() {
        let job = TestJob {
            message: "later".into(),
        };
        let entry = JobEntry::new(job, None, Some(Duration::from_secs(60))).unwrap();
        assert!(!entry.is_ready());
    }

    #[tokio::test]
    async fn queue_roundtrip_through_memory_backend() {
        let queue = Queue::new(MemoryBackend::new());

        let job = TestJob {
            message: "roundtrip".into(),
        };
        let job_id = queue.enqueue(job, Some(Priority::Normal)).await.unwrap();

        let entry = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(entry.id(), job_id);

        let result = entry.execute::<TestJob>().await;
        queue.complete(job_id, result).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed_jobs, 1);
    }
}
