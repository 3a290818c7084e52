//! Engine-wide error taxonomy.
//!
//! `EngineError` is the single error type returned by the core components
//! (C1-C6). It carries no transport detail — the gateway layer
//! (`gateway::problem`) is the only place that knows how to render one of
//! these as an RFC 7807 problem document or a webhook status code.

use thiserror::Error;

use crate::core_types::{ProductId, SlotId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error("product {0} is not on sale yet")]
    ProductUpcoming(ProductId),

    #[error("product {0} is sold out")]
    ProductSoldOut(ProductId),

    #[error("user already holds an active slot for product {0}")]
    DuplicateSlot(ProductId),

    #[error("slot {0} is not admissible for payment")]
    SlotNotAdmissible(SlotId),

    #[error("slot {0} found expired; payment requires async refund")]
    LatePayment(SlotId),

    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("idempotency key claimed with a conflicting outcome")]
    IdempotencyConflict,

    #[error("transient failure, retry with backoff: {0}")]
    Transient(String),

    #[error("atomic cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("durable store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("fatal error, operator investigation required: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Whether a caller may safely retry by resubmitting the identical
    /// request with backoff (as opposed to needing to change inputs).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_) | EngineError::CacheUnavailable(_))
    }

    /// Whether this error requires operator attention rather than being a
    /// normal user-facing outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_) | EngineError::IdempotencyConflict)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
