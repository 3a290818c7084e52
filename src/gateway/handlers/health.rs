//! Health check handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = 1703494800000_u64)]
    pub timestamp_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pings Postgres at most once per interval rather than on every request.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    static LAST_CHECK_MS: AtomicU64 = AtomicU64::new(0);
    const CHECK_INTERVAL_MS: u64 = 5000;

    let now = now_ms();
    let last_check = LAST_CHECK_MS.load(Ordering::Relaxed);
    let healthy = if now.saturating_sub(last_check) > CHECK_INTERVAL_MS {
        LAST_CHECK_MS.store(now, Ordering::Relaxed);
        match sqlx::query("SELECT 1").execute(&state.db_pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "healthz: postgres ping failed");
                false
            }
        }
    } else {
        true
    };

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(HealthResponse { timestamp_ms: now }))
}
