//! Redis-backed implementation. Each job lives as a JSON blob under
//! `{prefix}:job:{id}`; readiness ordering is a single sorted set per state
//! so `dequeue` is one `ZPOPMAX`/`ZRANGEBYSCORE` round trip.

use crate::{JobEntry, JobId, JobResult, JobState, QueueBackend, QueueError, QueueResult, QueueStats};
use async_trait::async_trait;
use redis::AsyncCommands;

pub struct RedisBackend {
    client: redis::Client,
    prefix: String,
}

impl RedisBackend {
    /// `queue_name` becomes the key prefix, so `sequence-jobs`, `email-jobs`,
    /// `contact-jobs` and `thread-watch-jobs` never collide in one Redis
    /// instance.
    pub fn new(redis_url: &str, queue_name: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Configuration(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            prefix: format!("lib-queue:{queue_name}"),
        })
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Backend(format!("failed to connect to redis: {e}")))
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    fn ready_key(&self) -> String {
        format!("{}:ready", self.prefix)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn state_key(&self, state: &JobState) -> String {
        format!("{}:state:{:?}", self.prefix, state)
    }

    /// Higher priority dominates; within a priority, earlier `run_at` wins.
    fn score(job: &JobEntry) -> f64 {
        let tier = match job.priority() {
            crate::Priority::Critical => 3,
            crate::Priority::High => 2,
            crate::Priority::Normal => 1,
            crate::Priority::Low => 0,
        } as f64;
        tier * 1e13 - job.run_at().timestamp_millis() as f64
    }

    async fn store(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &JobEntry,
    ) -> QueueResult<()> {
        let serialized = serde_json::to_string(job)?;
        let _: () = conn
            .set(self.job_key(job.id()), serialized)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn move_ready_delayed_jobs(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> QueueResult<()> {
        let now = chrono::Utc::now().timestamp_millis() as f64;
        let ids: Vec<String> = conn
            .zrangebyscore(self.delayed_key(), f64::MIN, now)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        for id in ids {
            let Some(job) = self.get_job_by_key_str(conn, &id).await? else {
                continue;
            };
            let score = Self::score(&job);
            let _: () = conn
                .zadd(self.ready_key(), &id, score)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            let _: () = conn
                .zrem(self.delayed_key(), &id)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_job_by_key_str(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &str,
    ) -> QueueResult<Option<JobEntry>> {
        let data: Option<String> = conn
            .get(format!("{}:job:{id}", self.prefix))
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        data.map(|d| serde_json::from_str(&d).map_err(QueueError::from))
            .transpose()
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn enqueue(&self, job: JobEntry) -> QueueResult<JobId> {
        let mut conn = self.conn().await?;
        let id = job.id();
        self.store(&mut conn, &job).await?;

        if job.is_ready() {
            let score = Self::score(&job);
            let _: () = conn
                .zadd(self.ready_key(), id.to_string(), score)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        } else {
            let score = job.run_at().timestamp_millis() as f64;
            let _: () = conn
                .zadd(self.delayed_key(), id.to_string(), score)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        }

        let _: () = conn
            .sadd(self.state_key(job.state()), id.to_string())
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(id)
    }

    async fn dequeue(&self) -> QueueResult<Option<JobEntry>> {
        let mut conn = self.conn().await?;
        self.move_ready_delayed_jobs(&mut conn).await?;

        let popped: Vec<(String, f64)> = conn
            .zpopmax(self.ready_key(), 1)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let Some((id_str, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let Some(mut job) = self.get_job_by_key_str(&mut conn, &id_str).await? else {
            return Ok(None);
        };

        let old_state = job.state().clone();
        job.mark_processing();
        self.store(&mut conn, &job).await?;

        let _: () = conn
            .srem(self.state_key(&old_state), &id_str)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let _: () = conn
            .sadd(self.state_key(job.state()), &id_str)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(Some(job))
    }

    async fn complete(&self, job_id: JobId, result: JobResult<()>) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let id_str = job_id.to_string();

        let mut job = self
            .get_job_by_key_str(&mut conn, &id_str)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(id_str.clone()))?;
        let old_state = job.state().clone();

        match result {
            Ok(()) => job.mark_completed(),
            Err(error) => {
                job.mark_failed(error.to_string());
                if job.state() == &JobState::Failed {
                    let score = job.run_at().timestamp_millis() as f64;
                    let _: () = conn
                        .zadd(self.delayed_key(), &id_str, score)
                        .await
                        .map_err(|e| QueueError::Backend(e.to_string()))?;
                }
            }
        }

        self.store(&mut conn, &job).await?;

        let _: () = conn
            .srem(self.state_key(&old_state), &id_str)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let _: () = conn
            .sadd(self.state_key(job.state()), &id_str)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> QueueResult<Option<JobEntry>> {
        let mut conn = self.conn().await?;
        self.get_job_by_key_str(&mut conn, &job_id.to_string())
            .await
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.conn().await?;
        let mut stats = QueueStats::default();

        for state in [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Dead,
        ] {
            let count: u64 = conn
                .scard(self.state_key(&state))
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            match state {
                JobState::Pending => stats.pending_jobs = count,
                JobState::Processing => stats.processing_jobs = count,
                JobState::Completed => stats.completed_jobs = count,
                JobState::Failed => stats.failed_jobs = count,
                JobState::Dead => stats.dead_jobs = count,
            }
        }
        Ok(stats)
    }
}
