//! Request handlers. Each submodule owns one route; shared helpers for
//! trace-id propagation live here.

use axum::http::{HeaderMap, HeaderValue};

use crate::core_types::TraceId;
use crate::trace::TraceContext;

pub mod admission;
pub mod health;
pub mod payment;

pub use admission::acquire_slot;
pub use health::healthz;
pub use payment::payment_callback;

/// Inherits the caller's `X-Trace-Id` if present, otherwise mints one. The
/// gateway is where an external trace id first enters the system, so every
/// downstream component (`AdmissionService`, `PaymentConfirmer`, ...) is
/// handed an already-resolved `TraceContext`.
pub(super) fn inbound_trace_context(headers: &HeaderMap) -> TraceContext {
    match headers.get("x-trace-id").and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => TraceContext::new(TraceId::from(id.to_string())),
        _ => TraceContext::generate(),
    }
}

pub(super) fn trace_header(headers: &mut HeaderMap, trace_id: &TraceId) {
    if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
        headers.insert("x-trace-id", value);
    }
}
