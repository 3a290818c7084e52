//! `POST /payments/callback` — the payment gateway webhook.
//!
//! The body must be read as raw bytes before any JSON parsing happens: HMAC
//! verification is over the exact bytes the gateway signed, not over a
//! round-tripped re-serialization of them.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::core_types::SlotId;
use crate::errors::EngineError;
use crate::payment::{CallbackOutcome, ConfirmResult, PaymentCallback};

use super::super::problem::Problem;
use super::super::state::AppState;
use super::{inbound_trace_context, trace_header};

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentCallbackBody {
    #[schema(value_type = String, format = "uuid")]
    pub slot_id: SlotId,
    pub idempotency_key: String,
    pub payment_reference: String,
    pub gateway_event_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentCallbackStatus,
}

#[derive(Debug, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentCallbackStatus {
    Success,
    Failed,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentCallbackResponse {
    pub result: &'static str,
}

/// Verified via `X-Signature: sha256=<hex hmac>` over the raw request body.
#[utoipa::path(
    post,
    path = "/payments/callback",
    request_body = PaymentCallbackBody,
    responses(
        (status = 200, description = "Callback processed", body = PaymentCallbackResponse, content_type = "application/json"),
        (status = 400, description = "Signature verification failed", content_type = "application/problem+json"),
        (status = 409, description = "Idempotency key reused with a conflicting outcome", content_type = "application/problem+json"),
        (status = 410, description = "Payment received after the slot expired", content_type = "application/problem+json")
    ),
    tag = "Payments"
)]
pub async fn payment_callback(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = inbound_trace_context(&headers);

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim_start_matches("sha256=");

    if !state.payments.verify_signature(&body, signature) {
        state.payments.audit_invalid_signature(&body, ctx.trace_id()).await;
        let mut resp = Problem(EngineError::InvalidSignature).into_response();
        trace_header(resp.headers_mut(), ctx.trace_id());
        return resp;
    }

    let parsed: PaymentCallbackBody = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "payment_callback: malformed body");
            let mut resp = (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "malformed body" })))
                .into_response();
            trace_header(resp.headers_mut(), ctx.trace_id());
            return resp;
        }
    };

    let callback = PaymentCallback {
        slot_id: parsed.slot_id,
        idempotency_key: parsed.idempotency_key,
        payment_reference: parsed.payment_reference,
        gateway_event_id: parsed.gateway_event_id,
        amount: parsed.amount,
        outcome: match parsed.status {
            PaymentCallbackStatus::Success => CallbackOutcome::Success,
            PaymentCallbackStatus::Failed => CallbackOutcome::Failed,
        },
    };

    let result = state.payments.confirm(callback, &ctx).await;

    match result {
        Ok(outcome) => {
            let label = match outcome {
                ConfirmResult::Completed => "completed",
                ConfirmResult::Failed => "failed",
                ConfirmResult::Replayed => "replayed",
                ConfirmResult::LatePayment => "late_payment",
            };
            let mut resp = (StatusCode::OK, Json(PaymentCallbackResponse { result: label })).into_response();
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
