//! Email-send worker: fetch a client, build a tracked message, call Gmail,
//! persist the result.

use chrono::Utc;
use entity::{
    email_event, email_tracking, sequence_contact, sequence_health, sequence_stats, sequence_step,
    tracked_link,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    email::{
        gmail::{parse_raw_message, GmailRestClient},
        mime::{self, OutboundMessage, ThreadHeaders},
    },
    queue_jobs::EmailJob,
    server_config::cfg,
    ServerState,
};

const SENT_REWRITE_DELAY_SECS: u64 = 1;
const SENT_REWRITE_RETRIES: u32 = 3;

pub async fn send_email(state: &ServerState, job: &EmailJob) -> anyhow::Result<()> {
    let step = sequence_step::Entity::find_by_id(job.step_id)
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("step {} not found", job.step_id))?;

    let to = if job.test_mode {
        cfg.test_email.clone().unwrap_or_else(|| job.to.clone())
    } else {
        job.to.clone()
    };

    let mut client = state.gmail_clients.get(job.user_id).await?;

    let thread_headers = match &job.thread_id {
        Some(thread_id) => match resolve_thread_headers(&client, thread_id).await {
            Ok(headers) => headers,
            Err(e) if is_unauthorized(&e) => {
                client = state.gmail_clients.force_refresh(job.user_id).await?;
                resolve_thread_headers(&client, thread_id).await?
            }
            Err(e) => return Err(e),
        },
        None => ThreadHeaders::default(),
    };

    let hash = Uuid::new_v4().to_string();
    let html_content = step.html_content.clone().unwrap_or_default();
    let (tracked_html, link_rewrites) = mime::inject_tracking(&html_content, &hash);

    let message_id = mime::generate_message_id();
    let outbound = OutboundMessage {
        to: &to,
        subject: &job.subject,
        html_body: &tracked_html,
        message_id: &message_id,
        in_reply_to: thread_headers.in_reply_to.as_deref(),
        references: &thread_headers.references,
    };
    let raw = mime::build_raw_message(&outbound)?;

    let sent = match client.send(&raw, job.thread_id.as_deref()).await {
        Ok(sent) => sent,
        Err(e) if is_unauthorized(&e) => {
            client = state.gmail_clients.force_refresh(job.user_id).await?;
            client.send(&raw, job.thread_id.as_deref()).await?
        }
        Err(e) => return Err(e),
    };

    let canonical_message_id = fetch_canonical_message_id(&client, &sent.id)
        .await
        .unwrap_or(message_id.clone());

    let existing_contact = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(job.sequence_id))
        .filter(sequence_contact::Column::ContactId.eq(job.contact_id))
        .one(&state.conn)
        .await?;
    let is_first_send = existing_contact
        .as_ref()
        .map(|c| c.started_at.is_none())
        .unwrap_or(true);

    persist_tracking(
        &state.conn,
        job,
        &hash,
        &canonical_message_id,
        sent.thread_id.as_deref(),
        &link_rewrites,
    )
    .await?;

    bump_sent_stats(&state.conn, job.sequence_id, is_first_send).await?;

    rewrite_sent_folder(&client, &sent.id, sent.thread_id.as_deref(), &link_rewrites).await;

    update_sequence_contact(&state.conn, job, sent.thread_id.clone()).await?;

    Ok(())
}

async fn bump_sent_stats(
    conn: &DatabaseConnection,
    sequence_id: i32,
    is_first_send: bool,
) -> anyhow::Result<()> {
    let existing = sequence_stats::Entity::find()
        .filter(sequence_stats::Column::SequenceId.eq(sequence_id))
        .one(conn)
        .await?;

    match existing {
        Some(row) => {
            let mut model: sequence_stats::ActiveModel = row.clone().into();
            model.sent_emails = Set(row.sent_emails + 1);
            if is_first_send {
                model.people_contacted = Set(row.people_contacted + 1);
            }
            model.updated_at = Set(Utc::now().into());
            model.update(conn).await?;
        }
        None => {
            sequence_stats::ActiveModel {
                sequence_id: Set(sequence_id),
                people_contacted: Set(if is_first_send { 1 } else { 0 }),
                sent_emails: Set(1),
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(())
}

async fn resolve_thread_headers(
    client: &GmailRestClient,
    thread_id: &str,
) -> anyhow::Result<ThreadHeaders> {
    let thread = client.get_thread(thread_id).await?;
    let messages = thread.messages.unwrap_or_default();

    let mut references = Vec::new();
    let mut in_reply_to = None;
    let mut original_subject = None;

    for message in &messages {
        if let Some(raw) = &message.raw {
            if let Ok(parsed) = parse_raw_message(raw) {
                if original_subject.is_none() {
                    original_subject = parsed.subject.clone();
                }
                if let Some(mid) = &parsed.message_id {
                    references.push(mid.clone());
                    in_reply_to = Some(mid.clone());
                }
            }
        }
    }

    Ok(ThreadHeaders {
        in_reply_to,
        references,
        original_subject,
    })
}

fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .and_then(|e| e.status())
        .map(|s| s == reqwest::StatusCode::UNAUTHORIZED)
        .unwrap_or(false)
}

async fn fetch_canonical_message_id(
    client: &GmailRestClient,
    message_id: &str,
) -> anyhow::Result<String> {
    let message = client.get_message_raw(message_id).await?;
    let raw = message.raw.ok_or_else(|| anyhow::anyhow!("no raw body"))?;
    let parsed = parse_raw_message(&raw)?;
    parsed
        .message_id
        .ok_or_else(|| anyhow::anyhow!("no Message-ID header"))
}

async fn persist_tracking(
    conn: &DatabaseConnection,
    job: &EmailJob,
    hash: &str,
    message_id: &str,
    thread_id: Option<&str>,
    link_rewrites: &[mime::TrackedLinkRewrite],
) -> anyhow::Result<()> {
    let txn = conn.begin().await?;

    let metadata = json!({
        "email": job.to,
        "userId": job.user_id,
        "sequenceId": job.sequence_id,
        "stepId": job.step_id,
        "contactId": job.contact_id,
    });

    let tracking = email_tracking::ActiveModel {
        hash: Set(hash.to_string()),
        message_id: Set(Some(message_id.to_string())),
        thread_id: Set(thread_id.map(str::to_string)),
        status: Set(email_tracking::EmailTrackingStatus::Sent),
        open_count: Set(0),
        sent_at: Set(Some(Utc::now().into())),
        metadata: Set(metadata),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    for link in link_rewrites {
        tracked_link::ActiveModel {
            email_tracking_id: Set(tracking.id),
            original_url: Set(link.original_url.clone()),
            click_count: Set(0),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    email_event::ActiveModel {
        email_tracking_id: Set(tracking.id),
        event_type: Set(email_event::EmailEventType::Sent),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(())
}

/// Gmail indexing latency means the post-send `messages.get` needs a
/// bounded retry; giving up is non-fatal, so failures here are logged,
/// never propagated.
async fn rewrite_sent_folder(
    client: &GmailRestClient,
    sent_message_id: &str,
    thread_id: Option<&str>,
    link_rewrites: &[mime::TrackedLinkRewrite],
) {
    tokio::time::sleep(std::time::Duration::from_secs(SENT_REWRITE_DELAY_SECS)).await;

    let mut last_err = None;
    for attempt in 0..SENT_REWRITE_RETRIES {
        match client.get_message_raw(sent_message_id).await {
            Ok(message) => {
                let Some(raw) = message.raw else {
                    return;
                };
                let Ok(parsed) = parse_raw_message(&raw) else {
                    return;
                };
                let Some(tracked_html) = parsed.html_body else {
                    return;
                };
                let untracked_html = mime::strip_tracking(&tracked_html, link_rewrites);

                let message_id = mime::generate_message_id();
                let outbound = OutboundMessage {
                    to: parsed.from.as_deref().unwrap_or_default(),
                    subject: parsed.subject.as_deref().unwrap_or_default(),
                    html_body: &untracked_html,
                    message_id: &message_id,
                    in_reply_to: parsed.in_reply_to.as_deref(),
                    references: &parsed.references,
                };
                let Ok(raw_untracked) = mime::build_raw_message(&outbound) else {
                    return;
                };

                if client
                    .insert(&raw_untracked, thread_id, &["SENT"])
                    .await
                    .is_ok()
                {
                    let _ = client.delete_message(sent_message_id).await;
                }
                return;
            }
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
    tracing::warn!(
        "sent-folder rewrite gave up after {SENT_REWRITE_RETRIES} attempts: {:?}, attempt {}",
        last_err,
        SENT_REWRITE_RETRIES
    );
}

/// Called once an `EmailJob` has exhausted its queue retries. Records a
/// `Failed` event against a freshly-created tracking row (a failed attempt
/// never gets one from `persist_tracking`), marks the contact `Failed`, puts
/// it in its own bounce/error cooldown, and rolls the failure into the
/// sequence's health counter.
pub async fn handle_exhausted_retries(
    state: &ServerState,
    job: &EmailJob,
    error: &str,
) -> anyhow::Result<()> {
    let metadata = json!({
        "email": job.to,
        "userId": job.user_id,
        "sequenceId": job.sequence_id,
        "stepId": job.step_id,
        "contactId": job.contact_id,
    });

    let tracking = email_tracking::ActiveModel {
        hash: Set(Uuid::new_v4().to_string()),
        thread_id: Set(job.thread_id.clone()),
        status: Set(email_tracking::EmailTrackingStatus::Pending),
        open_count: Set(0),
        metadata: Set(metadata),
        ..Default::default()
    }
    .insert(&state.conn)
    .await?;

    email_event::ActiveModel {
        email_tracking_id: Set(tracking.id),
        event_type: Set(email_event::EmailEventType::Failed),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(&state.conn)
    .await?;

    mark_contact_failed(&state.conn, job.sequence_id, job.contact_id).await?;
    bump_sequence_health(&state.conn, job.sequence_id, error).await?;
    state.rate_limiters.apply_error_cooldown(job.contact_id).await?;

    Ok(())
}

async fn mark_contact_failed(
    conn: &DatabaseConnection,
    sequence_id: i32,
    contact_id: i32,
) -> anyhow::Result<()> {
    let Some(row) = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(sequence_id))
        .filter(sequence_contact::Column::ContactId.eq(contact_id))
        .one(conn)
        .await?
    else {
        return Ok(());
    };

    let mut model: sequence_contact::ActiveModel = row.into();
    model.status = Set(sequence_contact::SequenceContactStatus::Failed);
    model.next_scheduled_at = Set(None);
    model.update(conn).await?;
    Ok(())
}

async fn bump_sequence_health(
    conn: &DatabaseConnection,
    sequence_id: i32,
    error: &str,
) -> anyhow::Result<()> {
    let existing = sequence_health::Entity::find()
        .filter(sequence_health::Column::SequenceId.eq(sequence_id))
        .one(conn)
        .await?;

    let now = Utc::now();
    match existing {
        Some(row) => {
            let mut model: sequence_health::ActiveModel = row.clone().into();
            model.error_count = Set(row.error_count + 1);
            model.last_error = Set(Some(error.to_string()));
            model.status = Set(sequence_health::SequenceHealthStatus::Error);
            model.updated_at = Set(now.into());
            model.update(conn).await?;
        }
        None => {
            sequence_health::ActiveModel {
                sequence_id: Set(sequence_id),
                status: Set(sequence_health::SequenceHealthStatus::Error),
                error_count: Set(1),
                last_error: Set(Some(error.to_string())),
                metrics: Set(json!({})),
                updated_at: Set(now.into()),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(())
}

async fn update_sequence_contact(
    conn: &DatabaseConnection,
    job: &EmailJob,
    thread_id: Option<String>,
) -> anyhow::Result<()> {
    let row = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(job.sequence_id))
        .filter(sequence_contact::Column::ContactId.eq(job.contact_id))
        .one(conn)
        .await?;

    let Some(row) = row else {
        return Ok(());
    };

    let now = Utc::now();
    let mut model: sequence_contact::ActiveModel = row.clone().into();
    model.status = Set(sequence_contact::SequenceContactStatus::Sent);
    model.last_processed_at = Set(Some(now.into()));
    if row.thread_id.is_none() {
        model.thread_id = Set(thread_id);
    }
    if row.started_at.is_none() {
        model.started_at = Set(Some(now.into()));
    }
    model.update(conn).await?;

    Ok(())
}
