//! Gmail Pub/Sub push endpoint. Verifies the bearer JWT Google signs the
//! request with, decodes the envelope, and hands off to the inbound
//! pipeline.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::{error::AppError, inbound, ServerState};

pub async fn handle(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<inbound::PushNotificationBody>,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    state
        .push_verifier
        .verify(token)
        .await
        .map_err(|e| AppError::Unauthorized(format!("push token verification failed: {e}")))?;

    let notification = inbound::decode_notification(&body)
        .map_err(|e| AppError::BadRequest(format!("malformed push body: {e}")))?;

    inbound::handle_push(&state, notification).await?;

    Ok(StatusCode::NO_CONTENT)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
