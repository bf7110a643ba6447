//! Tracking redirector: the 1x1 pixel for opens and the redirect for link
//! clicks. Both are unauthenticated public endpoints — anyone with the
//! hash can hit them, so neither handler trusts anything beyond the hash
//! itself.

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use entity::{email_event, email_tracking, link_click, sequence_stats, tracked_link};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Deserialize;

use crate::{error::AppError, ServerState};

/// RFC-minimal 43-byte transparent GIF.
const TRANSPARENT_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF,
    0x00, 0x00, 0x00, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

/// Google's own prefetchers and Gmail's compose-preview both trigger a pixel
/// fetch that must not count as a human open.
fn is_self_view(headers: &HeaderMap) -> bool {
    let ua = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    ua.contains("GoogleImageProxy")
        || ua.contains("Googlebot")
        || referer.contains("mail.google.com/mail/u/")
        || referer.contains("compose")
}

pub async fn track_open(
    State(state): State<ServerState>,
    Path(hash): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let hash = hash.trim_end_matches(".png").to_string();

    // Gmail's own compose-preview and Google's image proxy must not count as
    // an open; bounce them back to the same URL instead of serving the gif
    // so a genuine later fetch (by the recipient) still counts.
    if is_self_view(&headers) {
        return (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, uri.to_string())]).into_response();
    }

    if let Err(e) = record_open(&state.conn, &hash).await {
        tracing::error!("track_open failed for {hash}: {:?}", e);
    }

    gif_response()
}

fn gif_response() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "max-age=60, private"),
        ],
        TRANSPARENT_GIF,
    )
        .into_response()
}

async fn record_open(conn: &DatabaseConnection, hash: &str) -> anyhow::Result<()> {
    let Some(tracking) = email_tracking::Entity::find()
        .filter(email_tracking::Column::Hash.eq(hash))
        .one(conn)
        .await?
    else {
        return Ok(());
    };

    let first_open = tracking.opened_at.is_none();
    let now = Utc::now();

    let mut model: email_tracking::ActiveModel = tracking.clone().into();
    model.open_count = Set(tracking.open_count + 1);
    if first_open {
        model.opened_at = Set(Some(now.into()));
    }
    model.update(conn).await?;

    email_event::ActiveModel {
        email_tracking_id: Set(tracking.id),
        event_type: Set(email_event::EmailEventType::Opened),
        created_at: Set(now.into()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    if first_open {
        bump_sequence_stats(conn, &tracking, |s| {
            s.opened_emails += 1;
            s.unique_opens += 1;
        })
        .await?;
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    lid: Option<String>,
}

pub async fn track_click(
    State(state): State<ServerState>,
    Path(hash): Path<String>,
    Query(query): Query<ClickQuery>,
) -> Result<Response, AppError> {
    let Some(link_id) = query.lid else {
        return Err(AppError::BadRequest("missing lid".into()));
    };

    let tracking = email_tracking::Entity::find()
        .filter(email_tracking::Column::Hash.eq(&hash))
        .one(&state.conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown tracking hash {hash}")))?;

    let link = tracked_link::Entity::find_by_id(
        link_id
            .parse::<i32>()
            .map_err(|_| AppError::BadRequest("malformed lid".into()))?,
    )
    .one(&state.conn)
    .await?
    .ok_or_else(|| AppError::BadRequest("unknown lid".into()))?;

    if link.email_tracking_id != tracking.id {
        return Err(AppError::BadRequest("lid does not belong to hash".into()));
    }

    record_click(&state.conn, &tracking, &link).await?;

    Ok((StatusCode::FOUND, [(header::LOCATION, link.original_url.clone())]).into_response())
}

async fn record_click(
    conn: &DatabaseConnection,
    tracking: &email_tracking::Model,
    link: &tracked_link::Model,
) -> anyhow::Result<()> {
    let now = Utc::now();

    link_click::ActiveModel {
        tracked_link_id: Set(link.id),
        timestamp: Set(now.into()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    let mut link_model: tracked_link::ActiveModel = link.clone().into();
    link_model.click_count = Set(link.click_count + 1);
    link_model.update(conn).await?;

    let first_click = tracking.clicked_at.is_none();
    if first_click {
        let mut tracking_model: email_tracking::ActiveModel = tracking.clone().into();
        tracking_model.clicked_at = Set(Some(now.into()));
        tracking_model.update(conn).await?;
    }

    email_event::ActiveModel {
        email_tracking_id: Set(tracking.id),
        event_type: Set(email_event::EmailEventType::Clicked),
        created_at: Set(now.into()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    bump_sequence_stats(conn, tracking, |s| {
        s.clicked_emails += 1;
    })
    .await?;

    Ok(())
}

/// Recomputes rate fields from the already-mutated counters and writes the
/// row back, keyed via the tracking row's `metadata.sequenceId`.
async fn bump_sequence_stats(
    conn: &DatabaseConnection,
    tracking: &email_tracking::Model,
    mutate: impl FnOnce(&mut Counters),
) -> anyhow::Result<()> {
    let Some(sequence_id) = tracking.metadata.get("sequenceId").and_then(|v| v.as_i64()) else {
        return Ok(());
    };
    let sequence_id = sequence_id as i32;

    let Some(row) = sequence_stats::Entity::find()
        .filter(sequence_stats::Column::SequenceId.eq(sequence_id))
        .one(conn)
        .await?
    else {
        return Ok(());
    };

    let mut counters = Counters {
        opened_emails: row.opened_emails,
        unique_opens: row.unique_opens,
        clicked_emails: row.clicked_emails,
    };
    mutate(&mut counters);

    let mut model: sequence_stats::ActiveModel = row.clone().into();
    model.opened_emails = Set(counters.opened_emails);
    model.unique_opens = Set(counters.unique_opens);
    model.clicked_emails = Set(counters.clicked_emails);
    if row.sent_emails > 0 {
        model.open_rate = Set(counters.unique_opens as f64 / row.sent_emails as f64);
        model.click_rate = Set(counters.clicked_emails as f64 / row.sent_emails as f64);
    }
    model.updated_at = Set(Utc::now().into());
    model.update(conn).await?;

    Ok(())
}

struct Counters {
    opened_emails: i32,
    unique_opens: i32,
    clicked_emails: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(ua: Option<&str>, referer: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(ua) = ua {
            h.insert(header::USER_AGENT, HeaderValue::from_str(ua).unwrap());
        }
        if let Some(referer) = referer {
            h.insert(header::REFERER, HeaderValue::from_str(referer).unwrap());
        }
        h
    }

    #[test]
    fn google_image_proxy_is_self_view() {
        assert!(is_self_view(&headers(Some("GoogleImageProxy"), None)));
    }

    #[test]
    fn googlebot_is_self_view() {
        assert!(is_self_view(&headers(Some("Googlebot/2.1"), None)));
    }

    #[test]
    fn compose_preview_referer_is_self_view() {
        assert!(is_self_view(&headers(
            None,
            Some("https://mail.google.com/mail/u/0/compose")
        )));
    }

    #[test]
    fn ordinary_recipient_fetch_is_not_self_view() {
        assert!(!is_self_view(&headers(
            Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"),
            None
        )));
    }
}
