//! Inbound event pipeline: verifies a Gmail push notification's RS256-signed
//! OIDC token against Google's published JWKS, walks `history.list`, and
//! classifies each new message as an open, a reply, or a bounce.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use entity::{app_user, email_event, email_thread, email_tracking, oauth_account, sequence_contact};
use jsonwebtoken::{jwk::JwkSet, Algorithm, DecodingKey, Validation};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    email::gmail::{parse_raw_message, GmailRestClient},
    queue_jobs::ThreadWatchJob,
    server_config::cfg,
    ServerState,
};

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUER: &str = "https://accounts.google.com";

#[derive(Debug, Deserialize)]
struct PushClaims {
    aud: String,
}

/// Caches Google's published JWK set so every push doesn't refetch it.
#[derive(Clone)]
pub struct PushVerifier {
    http_client: reqwest::Client,
    cache: Arc<RwLock<Option<JwkSet>>>,
}

impl PushVerifier {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn jwk_set(&self) -> anyhow::Result<JwkSet> {
        if let Some(set) = self.cache.read().await.as_ref() {
            return Ok(set.clone());
        }
        let set: JwkSet = self
            .http_client
            .get(GOOGLE_CERTS_URL)
            .send()
            .await?
            .json()
            .await?;
        *self.cache.write().await = Some(set.clone());
        Ok(set)
    }

    /// Verifies the `Authorization: Bearer <token>` on a push request against
    /// `cfg.pubsub_audience`. Returns an error on any signature, issuer,
    /// audience, or expiry mismatch.
    pub async fn verify(&self, token: &str) -> anyhow::Result<()> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| anyhow::anyhow!("push token missing kid"))?;

        let jwk_set = self.jwk_set().await?;
        let jwk = jwk_set
            .find(&kid)
            .ok_or_else(|| anyhow::anyhow!("no matching JWK for kid {kid}"))?;
        let decoding_key = DecodingKey::from_jwk(jwk)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[cfg.pubsub_audience.as_str()]);
        validation.set_issuer(&[GOOGLE_ISSUER]);

        let data = jsonwebtoken::decode::<PushClaims>(token, &decoding_key, &validation)?;
        if data.claims.aud != cfg.pubsub_audience {
            anyhow::bail!("audience mismatch");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct PushNotificationBody {
    pub message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
pub struct PubsubMessage {
    pub data: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GmailNotification {
    #[serde(rename = "emailAddress")]
    pub email_address: String,
    #[serde(rename = "historyId")]
    pub history_id: i64,
}

/// Decodes the base64 Pub/Sub envelope into the Gmail-shaped payload.
pub fn decode_notification(body: &PushNotificationBody) -> anyhow::Result<GmailNotification> {
    let decoded = STANDARD.decode(&body.message.data)?;
    Ok(serde_json::from_slice(&decoded)?)
}

/// Looks up the user and enqueues the history walk so the webhook handler
/// returns immediately.
pub async fn handle_push(state: &ServerState, notification: GmailNotification) -> anyhow::Result<()> {
    let user = app_user::Entity::find()
        .filter(app_user::Column::Email.eq(&notification.email_address))
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no user for {}", notification.email_address))?;

    let job = ThreadWatchJob {
        user_id: user.id,
        email_address: notification.email_address,
        history_id: notification.history_id,
    };
    state.thread_watch_queue.0.enqueue(job, None).await?;
    Ok(())
}

/// The actual history walk, run from the `thread-watch-jobs` consumer.
pub async fn process_history(state: &ServerState, job: &ThreadWatchJob) -> anyhow::Result<()> {
    let account = oauth_account::Entity::find()
        .filter(oauth_account::Column::UserId.eq(job.user_id))
        .one(&state.conn)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no oauth account for user {}", job.user_id))?;

    let start_history_id = account.last_history_id.unwrap_or(job.history_id);
    let client = state.gmail_clients.get(job.user_id).await?;

    let mut page_token = None;
    let mut latest_history_id = start_history_id;
    loop {
        let history = client.list_history(start_history_id, page_token.as_deref()).await?;

        for record in history.history.unwrap_or_default() {
            for added in record.messages_added.unwrap_or_default() {
                let Some(message_id) = &added.message.id else {
                    continue;
                };
                if let Err(e) = classify_message(state, job.user_id, &client, message_id).await {
                    tracing::error!("inbound: failed to classify message {message_id}: {:?}", e);
                }
            }
        }

        if let Some(history_id) = history.history_id.as_deref().and_then(|s| s.parse::<i64>().ok()) {
            latest_history_id = history_id;
        }

        page_token = history.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    let mut model: oauth_account::ActiveModel = account.into();
    model.last_history_id = Set(Some(latest_history_id));
    model.updated_at = Set(Utc::now().into());
    model.update(&state.conn).await?;

    Ok(())
}

async fn classify_message(
    state: &ServerState,
    user_id: i32,
    client: &GmailRestClient,
    message_id: &str,
) -> anyhow::Result<()> {
    let message = client.get_message_raw(message_id).await?;
    let Some(raw) = &message.raw else {
        return Ok(());
    };
    let parsed = parse_raw_message(raw)?;

    if is_bounce(&parsed) {
        if let Some(thread_id) = &message.thread_id {
            classify_bounce(state, thread_id).await?;
        }
        return Ok(());
    }

    if is_own_sent_or_draft(&message) {
        return Ok(());
    }

    classify_open_by_references(state, &parsed).await?;

    if let Some(thread_id) = &message.thread_id {
        if classify_reply_by_thread(state, user_id, thread_id, parsed.message_id.as_deref()).await? {
            return Ok(());
        }
    }

    classify_reply_by_references(state, &parsed).await?;
    Ok(())
}

fn is_own_sent_or_draft(message: &crate::email::gmail::GmailMessage) -> bool {
    message
        .label_ids
        .as_ref()
        .map(|labels| labels.iter().any(|l| l == "DRAFT" || l == "SENT"))
        .unwrap_or(false)
}

fn is_bounce(parsed: &crate::email::gmail::ParsedMessage) -> bool {
    parsed.has_failed_recipients_header
        || parsed
            .content_type
            .as_deref()
            .map(|ct| ct.contains("multipart/report"))
            .unwrap_or(false)
        || parsed
            .from
            .as_deref()
            .map(|f| f.to_lowercase().contains("mailer-daemon"))
            .unwrap_or(false)
}

async fn classify_bounce(state: &ServerState, gmail_thread_id: &str) -> anyhow::Result<()> {
    let Some(thread) = email_thread::Entity::find()
        .filter(email_thread::Column::GmailThreadId.eq(gmail_thread_id))
        .one(&state.conn)
        .await?
    else {
        return Ok(());
    };

    let Some(tracking) = email_tracking::Entity::find()
        .filter(email_tracking::Column::ThreadId.eq(gmail_thread_id))
        .one(&state.conn)
        .await?
    else {
        return Ok(());
    };

    if has_event(&state.conn, tracking.id, email_event::EmailEventType::Bounced, None).await? {
        return Ok(());
    }

    append_event(&state.conn, tracking.id, email_event::EmailEventType::Bounced, None).await?;
    bump_stat(&state.conn, thread.sequence_id, StatKind::Bounced).await?;
    transition_contact(
        &state.conn,
        thread.sequence_id,
        thread.contact_id,
        sequence_contact::SequenceContactStatus::Bounced,
    )
    .await?;
    state.rate_limiters.apply_bounce_cooldown(thread.contact_id).await?;

    Ok(())
}

/// Secondary open signal: a reply-less message whose `References`/
/// `In-Reply-To` header names a message we sent is evidence the recipient
/// at least opened the thread, even if the pixel never fired.
async fn classify_open_by_references(
    state: &ServerState,
    parsed: &crate::email::gmail::ParsedMessage,
) -> anyhow::Result<()> {
    let mut candidates = parsed.references.clone();
    if let Some(in_reply_to) = &parsed.in_reply_to {
        candidates.push(in_reply_to.clone());
    }

    for message_id in candidates {
        let Some(tracking) = email_tracking::Entity::find()
            .filter(email_tracking::Column::MessageId.eq(&message_id))
            .one(&state.conn)
            .await?
        else {
            continue;
        };

        if has_event(&state.conn, tracking.id, email_event::EmailEventType::Opened, None).await? {
            return Ok(());
        }

        let first_open = tracking.opened_at.is_none();
        let now = Utc::now();
        let mut model: email_tracking::ActiveModel = tracking.clone().into();
        model.open_count = Set(tracking.open_count + 1);
        if first_open {
            model.opened_at = Set(Some(now.into()));
        }
        model.update(&state.conn).await?;

        append_event(&state.conn, tracking.id, email_event::EmailEventType::Opened, None).await?;

        if first_open {
            let sequence_id = tracking.metadata.get("sequenceId").and_then(|v| v.as_i64());
            if let Some(sequence_id) = sequence_id {
                bump_stat(&state.conn, sequence_id as i32, StatKind::Opened).await?;
            }
        }
        return Ok(());
    }

    Ok(())
}

async fn classify_reply_by_thread(
    state: &ServerState,
    user_id: i32,
    gmail_thread_id: &str,
    reply_message_id: Option<&str>,
) -> anyhow::Result<bool> {
    let Some(thread) = email_thread::Entity::find()
        .filter(email_thread::Column::UserId.eq(user_id))
        .filter(email_thread::Column::GmailThreadId.eq(gmail_thread_id))
        .one(&state.conn)
        .await?
    else {
        return Ok(false);
    };

    let Some(tracking) = email_tracking::Entity::find()
        .filter(email_tracking::Column::ThreadId.eq(gmail_thread_id))
        .one(&state.conn)
        .await?
    else {
        return Ok(false);
    };

    if has_event(
        &state.conn,
        tracking.id,
        email_event::EmailEventType::Replied,
        reply_message_id,
    )
    .await?
    {
        return Ok(true);
    }

    append_event(
        &state.conn,
        tracking.id,
        email_event::EmailEventType::Replied,
        reply_message_id,
    )
    .await?;
    bump_stat(&state.conn, thread.sequence_id, StatKind::Replied).await?;
    transition_contact(
        &state.conn,
        thread.sequence_id,
        thread.contact_id,
        sequence_contact::SequenceContactStatus::Replied,
    )
    .await?;

    Ok(true)
}

async fn classify_reply_by_references(
    state: &ServerState,
    parsed: &crate::email::gmail::ParsedMessage,
) -> anyhow::Result<()> {
    let mut candidates = parsed.references.clone();
    if let Some(in_reply_to) = &parsed.in_reply_to {
        candidates.push(in_reply_to.clone());
    }

    for message_id in candidates {
        let Some(tracking) = email_tracking::Entity::find()
            .filter(email_tracking::Column::MessageId.eq(&message_id))
            .one(&state.conn)
            .await?
        else {
            continue;
        };

        if has_event(
            &state.conn,
            tracking.id,
            email_event::EmailEventType::Replied,
            parsed.message_id.as_deref(),
        )
        .await?
        {
            return Ok(());
        }

        append_event(
            &state.conn,
            tracking.id,
            email_event::EmailEventType::Replied,
            parsed.message_id.as_deref(),
        )
        .await?;

        let sequence_id = tracking.metadata.get("sequenceId").and_then(|v| v.as_i64());
        let contact_id = tracking.metadata.get("contactId").and_then(|v| v.as_i64());
        if let (Some(sequence_id), Some(contact_id)) = (sequence_id, contact_id) {
            bump_stat(&state.conn, sequence_id as i32, StatKind::Replied).await?;
            transition_contact(
                &state.conn,
                sequence_id as i32,
                contact_id as i32,
                sequence_contact::SequenceContactStatus::Replied,
            )
            .await?;
        }
        return Ok(());
    }

    Ok(())
}

async fn has_event(
    conn: &DatabaseConnection,
    tracking_id: i32,
    event_type: email_event::EmailEventType,
    reply_message_id: Option<&str>,
) -> anyhow::Result<bool> {
    let mut query = email_event::Entity::find()
        .filter(email_event::Column::EmailTrackingId.eq(tracking_id))
        .filter(email_event::Column::EventType.eq(event_type));
    if let Some(mid) = reply_message_id {
        query = query.filter(email_event::Column::ReplyMessageId.eq(mid));
    }
    Ok(query.one(conn).await?.is_some())
}

async fn append_event(
    conn: &DatabaseConnection,
    tracking_id: i32,
    event_type: email_event::EmailEventType,
    reply_message_id: Option<&str>,
) -> anyhow::Result<()> {
    email_event::ActiveModel {
        email_tracking_id: Set(tracking_id),
        event_type: Set(event_type),
        reply_message_id: Set(reply_message_id.map(str::to_string)),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(())
}

enum StatKind {
    Replied,
    Bounced,
    Opened,
}

async fn bump_stat(conn: &DatabaseConnection, sequence_id: i32, kind: StatKind) -> anyhow::Result<()> {
    use entity::sequence_stats;

    let Some(row) = sequence_stats::Entity::find()
        .filter(sequence_stats::Column::SequenceId.eq(sequence_id))
        .one(conn)
        .await?
    else {
        return Ok(());
    };

    let mut model: sequence_stats::ActiveModel = row.clone().into();
    match kind {
        StatKind::Replied => {
            model.replied_emails = Set(row.replied_emails + 1);
            if row.sent_emails > 0 {
                model.reply_rate = Set((row.replied_emails + 1) as f64 / row.sent_emails as f64);
            }
        }
        StatKind::Bounced => {
            model.bounced_emails = Set(row.bounced_emails + 1);
        }
        StatKind::Opened => {
            model.opened_emails = Set(row.opened_emails + 1);
            model.unique_opens = Set(row.unique_opens + 1);
            if row.sent_emails > 0 {
                model.open_rate = Set((row.unique_opens + 1) as f64 / row.sent_emails as f64);
            }
        }
    }
    model.updated_at = Set(Utc::now().into());
    model.update(conn).await?;
    Ok(())
}

/// Guarded transition: never overwrites a terminal status.
async fn transition_contact(
    conn: &DatabaseConnection,
    sequence_id: i32,
    contact_id: i32,
    new_status: sequence_contact::SequenceContactStatus,
) -> anyhow::Result<()> {
    let Some(row) = sequence_contact::Entity::find()
        .filter(sequence_contact::Column::SequenceId.eq(sequence_id))
        .filter(sequence_contact::Column::ContactId.eq(contact_id))
        .one(conn)
        .await?
    else {
        return Ok(());
    };

    if is_terminal_status(row.status) {
        return Ok(());
    }

    let mut model: sequence_contact::ActiveModel = row.into();
    model.status = Set(new_status);
    if is_terminal_status(new_status) {
        model.next_scheduled_at = Set(None);
    }
    model.update(conn).await?;
    Ok(())
}

fn is_terminal_status(status: sequence_contact::SequenceContactStatus) -> bool {
    matches!(
        status,
        sequence_contact::SequenceContactStatus::Completed
            | sequence_contact::SequenceContactStatus::Replied
            | sequence_contact::SequenceContactStatus::OptedOut
            | sequence_contact::SequenceContactStatus::Bounced
            | sequence_contact::SequenceContactStatus::Failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_guarded() {
        assert!(is_terminal_status(sequence_contact::SequenceContactStatus::Completed));
        assert!(is_terminal_status(sequence_contact::SequenceContactStatus::Replied));
        assert!(is_terminal_status(sequence_contact::SequenceContactStatus::OptedOut));
        assert!(is_terminal_status(sequence_contact::SequenceContactStatus::Bounced));
        assert!(is_terminal_status(sequence_contact::SequenceContactStatus::Failed));
    }

    #[test]
    fn non_terminal_statuses_are_not_guarded() {
        assert!(!is_terminal_status(sequence_contact::SequenceContactStatus::NotSent));
        assert!(!is_terminal_status(sequence_contact::SequenceContactStatus::Scheduled));
    }
}
