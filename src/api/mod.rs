//! HTTP surface: provider callback endpoints and the health probe. The
//! handlers stay thin; every decision lives in the engines.

pub mod callbacks;

use crate::engine::{DepositEngine, WithdrawalEngine};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::PgPool;
use std::sync::Arc;

pub struct ApiState {
    pub deposits: Arc<DepositEngine>,
    pub withdrawals: Arc<WithdrawalEngine>,
    pub db_pool: Option<PgPool>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/callbacks/{provider}/pay", post(callbacks::pay_callback))
        .route(
            "/callbacks/{provider}/withdraw",
            post(callbacks::withdraw_callback),
        )
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let database = match &state.db_pool {
        Some(pool) => match crate::database::health_check(pool).await {
            Ok(()) => "up",
            Err(_) => "down",
        },
        None => "skipped",
    };

    let status = if database == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(serde_json::json!({
            "status": if database == "down" { "degraded" } else { "ok" },
            "database": database,
        })),
    )
}
