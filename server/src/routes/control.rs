//! Control API: launch/pause/resume/reset a sequence. Returns immediately;
//! the actual fan-out runs asynchronously via `sequence-jobs`.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use entity::{
    email_event, email_tracking, sequence, sequence_contact, sequence_health, sequence_stats,
    tracked_link,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppJsonResult},
    queue_jobs::SequenceJob,
    ServerState,
};

#[derive(Debug, Deserialize)]
pub struct LaunchBody {
    #[serde(rename = "userId")]
    pub user_id: i32,
    #[serde(rename = "testMode", default)]
    pub test_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    pub success: bool,
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "contactCount")]
    pub contact_count: u64,
    #[serde(rename = "stepCount")]
    pub step_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct UserScopedBody {
    #[serde(rename = "userId")]
    pub user_id: i32,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
}

async fn load_owned_sequence(
    state: &ServerState,
    sequence_id: i32,
    user_id: i32,
) -> Result<sequence::Model, AppError> {
    sequence::Entity::find_by_id(sequence_id)
        .filter(sequence::Column::UserId.eq(user_id))
        .one(&state.conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("sequence {sequence_id} not found for user {user_id}")))
}

pub async fn launch(
    State(state): State<ServerState>,
    Path(sequence_id): Path<i32>,
    Json(body): Json<LaunchBody>,
) -> AppJsonResult<LaunchResponse> {
    let seq = load_owned_sequence(&state, sequence_id, body.user_id).await?;

    let step_count = entity::sequence_step::Entity::find()
        .filter(entity::sequence_step::Column::SequenceId.eq(sequence_id))
        .count(&state.conn)
        .await?;
    if step_count == 0 {
        return Err(AppError::BadRequest("sequence has zero steps".into()));
    }

    let contact_count = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(sequence_id))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::Completed))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::OptedOut))
        .count(&state.conn)
        .await?;
    if contact_count == 0 {
        return Err(AppError::BadRequest("sequence has zero active contacts".into()));
    }

    let mut model: sequence::ActiveModel = seq.into();
    model.status = Set(sequence::SequenceStatus::Active);
    model.test_mode = Set(body.test_mode);
    model.updated_at = Set(Utc::now().into());
    model.update(&state.conn).await?;

    let job = SequenceJob {
        sequence_id,
        user_id: body.user_id,
        test_mode: body.test_mode,
    };
    let job_id = state.sequence_queue.0.enqueue(job, Some(lib_queue::Priority::High)).await?;

    Ok(Json(LaunchResponse {
        success: true,
        job_id: job_id.to_string(),
        contact_count,
        step_count,
    }))
}

pub async fn pause(
    State(state): State<ServerState>,
    Path(sequence_id): Path<i32>,
    Json(body): Json<UserScopedBody>,
) -> AppJsonResult<ControlResponse> {
    let seq = load_owned_sequence(&state, sequence_id, body.user_id).await?;
    let mut model: sequence::ActiveModel = seq.into();
    model.status = Set(sequence::SequenceStatus::Paused);
    model.updated_at = Set(Utc::now().into());
    model.update(&state.conn).await?;
    Ok(Json(ControlResponse { success: true }))
}

pub async fn resume(
    State(state): State<ServerState>,
    Path(sequence_id): Path<i32>,
    Json(body): Json<UserScopedBody>,
) -> AppJsonResult<LaunchResponse> {
    let seq = load_owned_sequence(&state, sequence_id, body.user_id).await?;

    let mut model: sequence::ActiveModel = seq.clone().into();
    model.status = Set(sequence::SequenceStatus::Active);
    model.updated_at = Set(Utc::now().into());
    model.update(&state.conn).await?;

    let step_count = entity::sequence_step::Entity::find()
        .filter(entity::sequence_step::Column::SequenceId.eq(sequence_id))
        .count(&state.conn)
        .await?;
    let contact_count = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(sequence_id))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::Completed))
        .filter(sequence_contact::Column::Status.ne(sequence_contact::SequenceContactStatus::OptedOut))
        .count(&state.conn)
        .await?;

    let job = SequenceJob {
        sequence_id,
        user_id: body.user_id,
        test_mode: seq.test_mode,
    };
    let job_id = state.sequence_queue.0.enqueue(job, Some(lib_queue::Priority::High)).await?;

    Ok(Json(LaunchResponse {
        success: true,
        job_id: job_id.to_string(),
        contact_count,
        step_count,
    }))
}

pub async fn reset(
    State(state): State<ServerState>,
    Path(sequence_id): Path<i32>,
    Json(body): Json<UserScopedBody>,
) -> AppJsonResult<ControlResponse> {
    let seq = load_owned_sequence(&state, sequence_id, body.user_id).await?;

    let txn = state.conn.begin().await?;

    let tracking_rows = email_tracking::Entity::find()
        .all(&txn)
        .await?
        .into_iter()
        .filter(|t| {
            t.metadata
                .get("sequenceId")
                .and_then(|v| v.as_i64())
                .map(|id| id as i32 == sequence_id)
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    for tracking in &tracking_rows {
        let links = tracked_link::Entity::find()
            .filter(tracked_link::Column::EmailTrackingId.eq(tracking.id))
            .all(&txn)
            .await?;
        for link in &links {
            entity::link_click::Entity::delete_many()
                .filter(entity::link_click::Column::TrackedLinkId.eq(link.id))
                .exec(&txn)
                .await?;
        }
        tracked_link::Entity::delete_many()
            .filter(tracked_link::Column::EmailTrackingId.eq(tracking.id))
            .exec(&txn)
            .await?;
        email_event::Entity::delete_many()
            .filter(email_event::Column::EmailTrackingId.eq(tracking.id))
            .exec(&txn)
            .await?;
        email_tracking::Entity::delete_by_id(tracking.id).exec(&txn).await?;
    }

    sequence_stats::Entity::delete_many()
        .filter(sequence_stats::Column::SequenceId.eq(sequence_id))
        .exec(&txn)
        .await?;
    sequence_health::Entity::delete_many()
        .filter(sequence_health::Column::SequenceId.eq(sequence_id))
        .exec(&txn)
        .await?;

    let contacts = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(sequence_id))
        .all(&txn)
        .await?;
    for contact in contacts {
        let mut model: sequence_contact::ActiveModel = contact.into();
        model.status = Set(sequence_contact::SequenceContactStatus::NotSent);
        model.current_step = Set(0);
        model.next_scheduled_at = Set(None);
        model.thread_id = Set(None);
        model.started_at = Set(None);
        model.last_processed_at = Set(None);
        model.completed_at = Set(None);
        model.update(&txn).await?;
    }

    let mut model: sequence::ActiveModel = seq.into();
    model.status = Set(sequence::SequenceStatus::Draft);
    model.test_mode = Set(false);
    model.updated_at = Set(Utc::now().into());
    model.update(&txn).await?;

    txn.commit().await?;

    state.rate_limiters.reset(body.user_id, sequence_id).await?;

    Ok(Json(ControlResponse { success: true }))
}
