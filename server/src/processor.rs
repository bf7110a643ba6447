//! Sequence processor: walks a sequence's active contacts, schedules the
//! next due step for each one, and re-enqueues itself if contacts remain
//! that aren't due yet.

use chrono::Utc;
use entity::{business_hours, business_hours_holiday, sequence, sequence_contact, sequence_step};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
};
use std::time::Duration;

use crate::{
    queue_jobs::{EmailJob, SequenceJob},
    scheduler::{self, BusinessHoursWindow, StdScheduleRng, WindowCounts},
    ServerState,
};

/// Errors here fail the whole sequence job (and so are retried by the
/// queue, up to 3 times); per-contact failures are caught and logged
/// instead of propagated.
pub async fn launch_sequence(state: &ServerState, job: &SequenceJob) -> anyhow::Result<()> {
    let check = state
        .rate_limiters
        .check(job.user_id, Some(job.sequence_id), None)
        .await?;
    if !check.allowed {
        tracing::info!(
            "sequence {} launch deferred: {:?}",
            job.sequence_id,
            check.reason
        );
        return Ok(());
    }

    let seq = sequence::Entity::find_by_id(job.sequence_id)
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("sequence {} not found", job.sequence_id))?;

    let steps = sequence_step::Entity::find()
        .filter(sequence_step::Column::SequenceId.eq(job.sequence_id))
        .order_by_asc(sequence_step::Column::Order)
        .all(&state.conn)
        .await?;

    let business_hours = load_business_hours(state, &seq).await?;

    let active_contacts = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(job.sequence_id))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::Completed))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::OptedOut))
        .all(&state.conn)
        .await?;

    let mut rng = StdScheduleRng::from_entropy();

    for contact in active_contacts {
        if let Err(e) = process_one_contact(
            state,
            job,
            &steps,
            business_hours.as_ref(),
            contact,
            &mut rng,
        )
        .await
        {
            tracing::error!("sequence processor: contact failed: {:?}", e);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    Ok(())
}

async fn process_one_contact(
    state: &ServerState,
    job: &SequenceJob,
    steps: &[sequence_step::Model],
    business_hours: Option<&BusinessHoursWindow>,
    contact: sequence_contact::Model,
    rng: &mut StdScheduleRng,
) -> anyhow::Result<()> {
    let per_contact = state
        .rate_limiters
        .check(job.user_id, Some(job.sequence_id), Some(contact.contact_id))
        .await?;
    if !per_contact.allowed {
        return Ok(());
    }

    if contact.current_step as usize >= steps.len() {
        mark_completed(state, &contact).await?;
        return Ok(());
    }

    let step = &steps[contact.current_step as usize];
    let subject = resolve_subject(steps, contact.current_step, step);

    let contact_id = contact.contact_id;
    let to = load_contact_email(state, contact_id).await?;

    let window_counts = fetch_window_counts(state, job.sequence_id).await?;
    let send_time = scheduler::compute_next_send(
        Utc::now(),
        step,
        business_hours,
        crate::server_config::cfg.demo_mode,
        window_counts,
        rng,
    );

    let thread_id = contact.thread_id.clone();
    let email_job = EmailJob {
        sequence_id: job.sequence_id,
        contact_id,
        step_id: step.id,
        user_id: job.user_id,
        to,
        subject,
        thread_id,
        scheduled_time: send_time,
        test_mode: job.test_mode,
    };

    let delay = (send_time - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    state
        .email_queue
        .0
        .enqueue_delayed(email_job, delay, Some(lib_queue::Priority::Normal))
        .await?;

    let next_step = contact.current_step + 1;
    let mut model: sequence_contact::ActiveModel = contact.into();
    model.current_step = Set(next_step);
    model.next_scheduled_at = Set(Some(send_time.into()));
    model.last_processed_at = Set(Some(Utc::now().into()));
    model.status = Set(sequence_contact::SequenceContactStatus::Scheduled);
    model.update(&state.conn).await?;

    state
        .rate_limiters
        .increment(job.user_id, job.sequence_id, contact_id)
        .await?;

    Ok(())
}

pub(crate) fn resolve_subject(
    steps: &[sequence_step::Model],
    current_step: i32,
    step: &sequence_step::Model,
) -> String {
    if step.reply_to_thread && current_step > 0 {
        if let Some(previous) = steps.get((current_step - 1) as usize) {
            if let Some(prev_subject) = &previous.subject {
                return crate::email::mime::reply_subject(prev_subject);
            }
        }
    }
    step.subject.clone().unwrap_or_default()
}

async fn load_contact_email(state: &ServerState, contact_id: i32) -> anyhow::Result<String> {
    let contact = entity::contact::Entity::find_by_id(contact_id)
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("contact {contact_id} not found"))?;
    Ok(contact.email)
}

async fn mark_completed(state: &ServerState, contact: &sequence_contact::Model) -> anyhow::Result<()> {
    let mut model: sequence_contact::ActiveModel = contact.clone().into();
    model.status = Set(sequence_contact::SequenceContactStatus::Completed);
    model.completed_at = Set(Some(Utc::now().into()));
    model.next_scheduled_at = Set(None);
    model.update(&state.conn).await?;
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

/// Counts of rows already scheduled in the target minute/hour, used by
/// the scheduler's rate-window jitter.
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
