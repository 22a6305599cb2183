// ============================================================================
// Inbox Routes
// ============================================================================
//
// Endpoints (all POST, JSON body, detached signature in a header):
// - POST /send         - signed by the sender
// - POST /read         - signed by the receiver
// - POST /set-read     - signed by the receiver (addressable stores only)
// - POST /count-unread - signed by the receiver
// - POST /delete       - signed by the receiver (addressable stores only)
//
// Bodies are taken as raw bytes: the signature covers them exactly as sent.
//
// ============================================================================

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppResult;
use crate::message::{AckResponse, CountResponse, ReadResponse, SendResponse};

fn signature<'a>(headers: &'a HeaderMap, app_context: &AppContext) -> Option<&'a str> {
    headers
        .get(app_context.config.auth.signature_header.as_str())
        .and_then(|value| value.to_str().ok())
}

/// POST /send
pub async fn send(
    State(app_context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<SendResponse>> {
    let response = app_context
        .inbox
        .send(&body, signature(&headers, &app_context))
        .await?;
    Ok(Json(response))
}

/// POST /read
pub async fn read(
    State(app_context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ReadResponse>> {
    let response = app_context
        .inbox
        .read(&body, signature(&headers, &app_context))
        .await?;
    Ok(Json(response))
}

/// POST /set-read
pub async fn set_read(
    State(app_context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<AckResponse>> {
    let response = app_context
        .inbox
        .set_read(&body, signature(&headers, &app_context))
        .await?;
    Ok(Json(response))
}

/// POST /count-unread
pub async fn count_unread(
    State(app_context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<CountResponse>> {
    let response = app_context
        .inbox
        .count_unread(&body, signature(&headers, &app_context))
        .await?;
    Ok(Json(response))
}

/// POST /delete
pub async fn delete(
    State(app_context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<AckResponse>> {
    let response = app_context
        .inbox
        .delete(&body, signature(&headers, &app_context))
        .await?;
    Ok(Json(response))
}
