//! Provider callback handlers.
//!
//! The raw body is handed to the adapter untouched; the response body is
//! whatever ack the provider's protocol expects. A non-2xx response makes
//! the provider retry, which is exactly what we want for signature
//! failures and transient errors.

use crate::api::ApiState;
use crate::engine::CallContext;
use crate::error::EngineError;
use crate::providers::{CallbackRequest, ProviderId};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

fn callback_request(headers: &HeaderMap, body: Bytes) -> CallbackRequest {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/x-www-form-urlencoded")
        .to_string();
    CallbackRequest {
        content_type,
        body: body.to_vec(),
    }
}

fn error_response(provider: &str, e: EngineError) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warn!(provider = %provider, status = %status, error = %e, "Callback rejected");
    (status, "fail").into_response()
}

/// POST /callbacks/{provider}/pay
pub async fn pay_callback(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(provider_id) = ProviderId::from_str(&provider) else {
        return (StatusCode::NOT_FOUND, "unknown provider").into_response();
    };

    let ctx = CallContext::new(Uuid::new_v4().to_string());
    info!(
        request_id = %ctx.request_id,
        provider = %provider_id,
        bytes = body.len(),
        "Received pay callback"
    );

    let request = callback_request(&headers, body);
    match state.deposits.apply_callback(&ctx, provider_id, &request).await {
        Ok(ack) => (StatusCode::OK, ack).into_response(),
        Err(e) => error_response(&provider, e),
    }
}

/// POST /callbacks/{provider}/withdraw
pub async fn withdraw_callback(
    State(state): State<Arc<ApiState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(provider_id) = ProviderId::from_str(&provider) else {
        return (StatusCode::NOT_FOUND, "unknown provider").into_response();
    };

    let ctx = CallContext::new(Uuid::new_v4().to_string());
    info!(
        request_id = %ctx.request_id,
        provider = %provider_id,
        bytes = body.len(),
        "Received withdraw callback"
    );

    let request = callback_request(&headers, body);
    match state
        .withdrawals
        .apply_callback(&ctx, provider_id, &request)
        .await
    {
        Ok(ack) => (StatusCode::OK, ack).into_response(),
        Err(e) => error_response(&provider, e),
    }
}
