//! `POST /slots/acquire` — the admission entry point.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::core_types::{ProductId, UserId};

use super::super::problem::Problem;
use super::super::state::AppState;
use super::{inbound_trace_context, trace_header};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcquireSlotRequest {
    #[schema(value_type = String, format = "uuid")]
    pub product_id: ProductId,
    pub user_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AcquireSlotResponse {
    #[schema(value_type = String, format = "uuid")]
    pub slot_id: crate::core_types::SlotId,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub position: Option<i64>,
}

/// Admits a user into a purchase slot for a product, or rejects them with a
/// problem document (`SOLD_OUT`, `UPCOMING`, `DUPLICATE`, ...).
#[utoipa::path(
    post,
    path = "/slots/acquire",
    request_body = AcquireSlotRequest,
    responses(
        (status = 202, description = "Slot acquired", body = AcquireSlotResponse, content_type = "application/json"),
        (status = 409, description = "User already holds an active slot for this product", content_type = "application/problem+json"),
        (status = 410, description = "Product sold out", content_type = "application/problem+json"),
        (status = 422, description = "Sale has not opened yet", content_type = "application/problem+json"),
        (status = 503, description = "Transient failure, retry with backoff", content_type = "application/problem+json")
    ),
    tag = "Admission"
)]
pub async fn acquire_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AcquireSlotRequest>,
) -> Response {
    let ctx = inbound_trace_context(&headers);
    let arrival_ms = Utc::now().timestamp_millis();

    let result = state
        .admission
        .acquire_slot(req.product_id, UserId::from(req.user_id), arrival_ms, &ctx)
        .await;

    match result {
        Ok(acquired) => {
            let body = AcquireSlotResponse {
                slot_id: acquired.slot_id,
                expires_at: acquired.expires_at,
                remaining_seconds: acquired.remaining_seconds,
                position: acquired.position,
            };
            let mut resp = (StatusCode::ACCEPTED, Json(body)).into_response();
            trace_header(resp.headers_mut(), ctx.trace_id());
            resp
        }
        Err(e) => {
            let mut resp = Problem(e).into_response();
            trace_header(resp.headers_mut(), ctx.trace_id());
            resp
        }
    }
}
