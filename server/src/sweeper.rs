//! Schedule sweeper. The single source of truth for "is this email due" —
//! the processor only seeds the first `nextScheduledAt`. Polls on a fixed
//! interval and scans for due (sequence, contact) rows rather than reacting
//! to any external trigger.

use chrono::Utc;
use entity::{business_hours, business_hours_holiday, sequence, sequence_contact, sequence_step};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::time::Duration;

use crate::{
    queue_jobs::{ContactJob, EmailJob},
    scheduler::{self, BusinessHoursWindow, StdScheduleRng, WindowCounts},
    ServerState,
};

pub const CHECK_INTERVAL_SECS: u64 = 30;
const RETRY_DELAY_MINUTES: i64 = 5;

/// Runs forever, ticking every `CHECK_INTERVAL_SECS`. Started once from
/// `main` as a background task and meant to run as a singleton — running
/// more than one tick concurrently is safe because every row update below
/// is conditioned on the values last observed, but duplicate sweepers
/// waste queries, so the caller should only spawn one.
pub async fn run(state: ServerState) {
    let mut interval = tokio::time::interval(Duration::from_secs(CHECK_INTERVAL_SECS));
    loop {
        interval.tick().await;
        if let Err(e) = tick(&state).await {
            tracing::error!("sweeper tick failed: {:?}", e);
        }
    }
}

async fn tick(state: &ServerState) -> anyhow::Result<()> {
    let now = Utc::now();
    let due = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::Completed))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::Replied))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::Bounced))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::OptedOut))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::Failed))
        .filter(sequence_contact::Column::NextScheduledAt.lte(now))
        .filter(sequence_contact::Column::NextScheduledAt.is_not_null())
        .all(&state.conn)
        .await?;

    for row in due {
        if let Err(e) = process_row(state, row).await {
            tracing::error!("sweeper: row failed: {:?}", e);
        }
    }

    Ok(())
}

async fn process_row(state: &ServerState, row: sequence_contact::Model) -> anyhow::Result<()> {
    let seq = sequence::Entity::find_by_id(row.sequence_id)
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("sequence {} not found", row.sequence_id))?;

    if seq.status == sequence::SequenceStatus::Paused {
        return Ok(());
    }

    let steps = sequence_step::Entity::find()
        .filter(sequence_step::Column::SequenceId.eq(row.sequence_id))
        .all(&state.conn)
        .await?;
    let mut steps = steps;
    steps.sort_by_key(|s| s.order);

    let current_step = row.current_step;

    let step = match steps.get(current_step as usize) {
        Some(step) => step.clone(),
        None => {
            // The step the row points at was deleted out from under it.
            if (current_step as usize) >= steps.len() {
                finalize_row(state, &row).await?;
            } else {
                advance_immediately(state, &row).await?;
            }
            return Ok(());
        }
    };

    let check = state
        .rate_limiters
        .check(seq.user_id, Some(row.sequence_id), Some(row.contact_id))
        .await?;
    if !check.allowed {
        // Leave the row untouched; the next tick retries.
        return Ok(());
    }

    let business_hours = load_business_hours(state, &seq).await?;
    let window_counts = fetch_window_counts(state, row.sequence_id).await?;
    let mut rng = StdScheduleRng::from_entropy();

    let send_time = scheduler::compute_next_send(
        Utc::now(),
        &step,
        business_hours.as_ref(),
        crate::server_config::cfg.demo_mode,
        window_counts,
        &mut rng,
    );

    match enqueue_and_advance(state, &row, &seq, &step, &steps, send_time).await {
        Ok(()) => {}
        Err(e) => {
            tracing::error!("sweeper: contact {} failed, retry in {RETRY_DELAY_MINUTES}m: {:?}", row.contact_id, e);
            retry_later(&state.conn, &row).await?;
        }
    }

    Ok(())
}

async fn enqueue_and_advance(
    state: &ServerState,
    row: &sequence_contact::Model,
    seq: &sequence::Model,
    step: &sequence_step::Model,
    steps: &[sequence_step::Model],
    send_time: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    let contact = entity::contact::Entity::find_by_id(row.contact_id)
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("contact {} not found", row.contact_id))?;

    let subject = crate::processor::resolve_subject(steps, row.current_step, step);

    let job = EmailJob {
        sequence_id: row.sequence_id,
        contact_id: row.contact_id,
        step_id: step.id,
        user_id: seq.user_id,
        to: contact.email,
        subject,
        thread_id: row.thread_id.clone(),
        scheduled_time: send_time,
        test_mode: seq.test_mode,
    };
    state.email_queue.0.enqueue(job, None).await?;

    let now = Utc::now();
    let mut model: sequence_contact::ActiveModel = row.clone().into();

    let next_index = row.current_step + 1;
    if next_index as usize >= steps.len() {
        model.status = Set(sequence_contact::SequenceContactStatus::Completed);
        model.completed_at = Set(Some(now.into()));
        model.next_scheduled_at = Set(None);
    } else {
        let next_step = &steps[next_index as usize];
        let business_hours = load_business_hours(state, seq).await?;
        let window_counts = fetch_window_counts(state, row.sequence_id).await?;
        let mut rng = StdScheduleRng::from_entropy();
        let next_send_time = scheduler::compute_next_send(
            now,
            next_step,
            business_hours.as_ref(),
            crate::server_config::cfg.demo_mode,
            window_counts,
            &mut rng,
        );
        model.next_scheduled_at = Set(Some(next_send_time.into()));
    }
    model.current_step = Set(next_index);
    model.last_processed_at = Set(Some(now.into()));
    model.update(&state.conn).await?;

    state
        .rate_limiters
        .increment(seq.user_id, row.sequence_id, row.contact_id)
        .await?;

    Ok(())
}

async fn finalize_row(state: &ServerState, row: &sequence_contact::Model) -> anyhow::Result<()> {
    let mut model: sequence_contact::ActiveModel = row.clone().into();
    model.status = Set(sequence_contact::SequenceContactStatus::Completed);
    model.completed_at = Set(Some(Utc::now().into()));
    model.next_scheduled_at = Set(None);
    model.update(&state.conn).await?;
    Ok(())
}

/// The step the row pointed at no longer exists but there are later steps —
/// move on to the next one immediately.
async fn advance_immediately(state: &ServerState, row: &sequence_contact::Model) -> anyhow::Result<()> {
    let mut model: sequence_contact::ActiveModel = row.clone().into();
    model.current_step = Set(row.current_step + 1);
    model.next_scheduled_at = Set(Some(Utc::now().into()));
    model.update(&state.conn).await?;
    Ok(())
}

async fn retry_later(conn: &DatabaseConnection, row: &sequence_contact::Model) -> anyhow::Result<()> {
    let retry_at = Utc::now() + chrono::Duration::minutes(RETRY_DELAY_MINUTES);
    let mut model: sequence_contact::ActiveModel = row.clone().into();
    model.next_scheduled_at = Set(Some(retry_at.into()));
    model.update(conn).await?;
    Ok(())
}

async fn load_business_hours(
    state: &ServerState,
    seq: &sequence::Model,
) -> anyhow::Result<Option<BusinessHoursWindow>> {
    let Some(business_hours_id) = seq.business_hours_id else {
        return Ok(None);
    };
    let Some(row) = business_hours::Entity::find_by_id(business_hours_id)
        .one(&state.conn)
        .await?
    else {
        return Ok(None);
    };
    let holidays = business_hours_holiday::Entity::find()
        .filter(business_hours_holiday::Column::BusinessHoursId.eq(business_hours_id))
        .all(&state.conn)
        .await?
        .into_iter()
        .map(|h| h.holiday_date)
        .collect();
    Ok(Some(BusinessHoursWindow::from_model(&row, holidays)?))
}

async fn fetch_window_counts(state: &ServerState, sequence_id: i32) -> anyhow::Result<WindowCounts> {
    let now = Utc::now();
    let rows = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(sequence_id))
        .filter(sequence_contact::Column::NextScheduledAt.gte(now))
        .all(&state.conn)
        .await?;

    let same_minute = rows
        .iter()
        .filter(|r| {
            r.next_scheduled_at
                .map(|t| {
                    let t: chrono::DateTime<Utc> = t.into();
                    t.timestamp() / 60 == now.timestamp() / 60
                })
                .unwrap_or(false)
        })
        .count() as i64;
    let same_hour = rows
        .iter()
        .filter(|r| {
            r.next_scheduled_at
                .map(|t| {
                    let t: chrono::DateTime<Utc> = t.into();
                    t.timestamp() / 3600 == now.timestamp() / 3600
                })
                .unwrap_or(false)
        })
        .count() as i64;

    Ok(WindowCounts {
        same_minute,
        same_hour,
    })
}

/// The sweeper tick also handles single due rows enqueued directly as
/// `ContactJob`s (e.g. from a manual "send now" admin action), re-using
/// the same per-row logic as the periodic scan.
pub async fn process_due_contact(state: &ServerState, job: &ContactJob) -> anyhow::Result<()> {
    let row = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(job.sequence_id))
        .filter(sequence_contact::Column::ContactId.eq(job.contact_id))
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("sequence_contact ({}, {}) not found", job.sequence_id, job.contact_id))?;

    process_row(state, row).await
}
