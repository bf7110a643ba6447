//! Job payloads for the four named queues the system maintains:
//! `sequence-jobs`, `email-jobs`, `contact-jobs`, `thread-watch-jobs`.
//! Each implements `lib_queue::Job`; `run_entry` below dispatches a
//! dequeued entry to the module that actually owns its side effects.

use async_trait::async_trait;
use lib_queue::{Job, JobResult};
use serde::{Deserialize, Serialize};

use crate::{processor, sweeper, email::worker, inbound, ServerState};

/// Launches or re-evaluates a sequence; created by the control API on
/// launch/resume, and periodically by the scheduler's own sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceJob {
    pub sequence_id: i32,
    pub user_id: i32,
    pub test_mode: bool,
}

#[async_trait]
impl Job for SequenceJob {
    async fn execute(&self) -> JobResult<()> {
        // Dispatched through `JobRunner` below, which carries `ServerState`;
        // the bare `execute` is only used by `JobEntry::execute` in tests.
        Ok(())
    }

    fn job_type(&self) -> &'static str {
        "sequence-job"
    }

    fn max_retries(&self) -> u32 {
        3
    }
}

/// One due `(sequence, contact)` row the sweeper picked up this tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactJob {
    pub sequence_id: i32,
    pub contact_id: i32,
}

#[async_trait]
impl Job for ContactJob {
    async fn execute(&self) -> JobResult<()> {
        Ok(())
    }

    fn job_type(&self) -> &'static str {
        "contact-job"
    }
}

/// A single queued send: one contact, one step, one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub sequence_id: i32,
    pub contact_id: i32,
    pub step_id: i32,
    pub user_id: i32,
    pub to: String,
    pub subject: String,
    pub thread_id: Option<String>,
    pub scheduled_time: chrono::DateTime<chrono::Utc>,
    pub test_mode: bool,
}

#[async_trait]
impl Job for EmailJob {
    async fn execute(&self) -> JobResult<()> {
        Ok(())
    }

    fn job_type(&self) -> &'static str {
        "email-job"
    }

    fn max_retries(&self) -> u32 {
        2
    }
}

/// Enqueued by the push-notification handler so the webhook itself returns
/// immediately; the consumer walks `history.list` to find what changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadWatchJob {
    pub user_id: i32,
    pub email_address: String,
    pub history_id: i64,
}

#[async_trait]
impl Job for ThreadWatchJob {
    async fn execute(&self) -> JobResult<()> {
        Ok(())
    }

    fn job_type(&self) -> &'static str {
        "thread-watch-job"
    }
}

/// Runs a dequeued job entry against live `ServerState`, since `Job::execute`
/// itself cannot borrow external state.
pub async fn run_entry(state: &ServerState, job_type: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
    match job_type {
        "sequence-job" => {
            let job: SequenceJob = serde_json::from_value(payload.clone())?;
            processor::launch_sequence(state, &job).await
        }
        "contact-job" => {
            let job: ContactJob = serde_json::from_value(payload.clone())?;
            sweeper::process_due_contact(state, &job).await
        }
        "email-job" => {
            let job: EmailJob = serde_json::from_value(payload.clone())?;
            worker::send_email(state, &job).await
        }
        "thread-watch-job" => {
            let job: ThreadWatchJob = serde_json::from_value(payload.clone())?;
            inbound::process_history(state, &job).await
        }
        other => anyhow::bail!("unknown job type: {other}"),
    }
}
