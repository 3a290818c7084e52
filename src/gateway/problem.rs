//! Maps `EngineError` onto RFC 7807 problem documents (`application/problem+json`).
//! Grounded on the teacher's `ApiResponse`/`ApiError` pair in
//! `gateway/types/response.rs`: one status code, one stable machine-readable
//! `type`, one human `detail`, no internal detail ever leaked past `detail`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::errors::EngineError;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProblemDetail {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ProblemDetail {
    fn new(problem_type: &str, title: &str, status: StatusCode, detail: impl Into<String>) -> (StatusCode, Self) {
        (
            status,
            Self {
                problem_type: format!("https://errors.slotengine.dev/{problem_type}"),
                title: title.to_string(),
                status: status.as_u16(),
                detail: detail.into(),
            },
        )
    }
}

pub struct Problem(pub EngineError);

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let detail = self.0.to_string();
        let (status, body) = match self.0 {
            EngineError::ProductNotFound(_) => {
                ProblemDetail::new("product-not-found", "Product not found", StatusCode::NOT_FOUND, detail)
            }
            EngineError::ProductUpcoming(_) => ProblemDetail::new(
                "product-not-on-sale",
                "Sale has not opened",
                StatusCode::UNPROCESSABLE_ENTITY,
                detail,
            ),
            EngineError::ProductSoldOut(_) => {
                ProblemDetail::new("sold-out", "Product is sold out", StatusCode::GONE, detail)
            }
            EngineError::DuplicateSlot(_) => {
                ProblemDetail::new("duplicate-slot", "Active slot already held", StatusCode::CONFLICT, detail)
            }
            EngineError::SlotNotAdmissible(_) => ProblemDetail::new(
                "slot-not-admissible",
                "Slot is not admissible for payment",
                StatusCode::CONFLICT,
                detail,
            ),
            EngineError::LatePayment(_) => {
                ProblemDetail::new("late-payment", "Payment received after slot expiry", StatusCode::GONE, detail)
            }
            EngineError::InvalidSignature => ProblemDetail::new(
                "invalid-signature",
                "Webhook signature verification failed",
                StatusCode::BAD_REQUEST,
                detail,
            ),
            EngineError::IdempotencyConflict => ProblemDetail::new(
                "idempotency-conflict",
                "Idempotency key reused with a conflicting outcome",
                StatusCode::CONFLICT,
                detail,
            ),
            EngineError::Transient(_) | EngineError::CacheUnavailable(_) => ProblemDetail::new(
                "transient",
                "Temporary failure, retry with backoff",
                StatusCode::SERVICE_UNAVAILABLE,
                detail,
            ),
            EngineError::Store(_) | EngineError::Fatal(_) => ProblemDetail::new(
                "internal",
                "Internal server error",
                StatusCode::INTERNAL_SERVER_ERROR,
                "an internal error occurred",
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for Problem {
    fn from(err: EngineError) -> Self {
        Problem(err)
    }
}
