//! In-memory backend. Used by integration tests that would otherwise need a
//! live Redis instance.

use crate::{JobEntry, JobId, JobResult, JobState, QueueBackend, QueueError, QueueResult, QueueStats};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
struct Ordered(JobEntry);

impl PartialEq for Ordered {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority() == other.0.priority() && self.0.run_at() == other.0.run_at()
    }
}

impl Eq for Ordered {}

impl PartialOrd for Ordered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ordered {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.0.priority().cmp(&other.0.priority()) {
            Ordering::Equal => other.0.run_at().cmp(&self.0.run_at()),
            ord => ord,
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    jobs: DashMap<JobId, JobEntry>,
    pending: RwLock<BinaryHeap<Ordered>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ready(&self) -> Option<JobEntry> {
        let mut heap = self.pending.write();
        while let Some(top) = heap.peek() {
            if !self.jobs.contains_key(&top.0.id()) {
                heap.pop();
                continue;
            }
            if top.0.is_ready() {
                return heap.pop().map(|o| o.0);
            }
            break;
        }
        None
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, job: JobEntry) -> QueueResult<JobId> {
        let id = job.id();
        if job.state() == &JobState::Pending {
            self.pending.write().push(Ordered(job.clone()));
        }
        self.jobs.insert(id, job);
        Ok(id)
    }

    async fn dequeue(&self) -> QueueResult<Option<JobEntry>> {
        let Some(mut job) = self.next_ready() else {
            return Ok(None);
        };
        job.mark_processing();
        self.jobs.insert(job.id(), job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, job_id: JobId, result: JobResult<()>) -> QueueResult<()> {
        let mut entry = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        match result {
            Ok(()) => entry.mark_completed(),
            Err(error) => {
                entry.mark_failed(error.to_string());
                if entry.state() == &JobState::Failed {
                    self.pending.write().push(Ordered(entry.clone()));
                }
            }
        }
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> QueueResult<Option<JobEntry>> {
        Ok(self.jobs.get(&job_id).map(|e| e.clone()))
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut stats = QueueStats::default();
        for entry in self.jobs.iter() {
            match entry.state() {
                JobState::Pending => stats.pending_jobs += 1,
                JobState::Processing => stats.processing_jobs += 1,
                JobState::Completed => stats.completed_jobs += 1,
                JobState::Failed => stats.failed_jobs += 1,
                JobState::Dead => stats.dead_jobs += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Job, Priority};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestJob {
        id: u32,
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
    async fn high_priority_dequeues_first() {
        let backend = MemoryBackend::new();

        let low = JobEntry::new(TestJob { id: 1 }, Some(Priority::Low), None).unwrap();
        let high = JobEntry::new(TestJob { id: 2 }, Some(Priority::High), None).unwrap();

        backend.enqueue(low).await.unwrap();
        backend.enqueue(high).await.unwrap();

        let first = backend.dequeue().await.unwrap().unwrap();
        assert_eq!(first.priority(), Priority::High);
    }

    #[tokio::test]
    async fn failed_job_is_retried_until_max_retries_then_dead() {
        let backend = MemoryBackend::new();
        let entry = JobEntry::new(TestJob { id: 1 }, None, None).unwrap();
        let id = entry.id();
        backend.enqueue(entry).await.unwrap();

        for _ in 0..3 {
            let _ = backend.dequeue().await.unwrap();
            let err: JobResult<()> = Err("boom".into());
            backend.complete(id, err).await.unwrap();
        }

        let job = backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.state(), &JobState::Dead);
    }
}
