//! The Atomic Cache port (C1): single-round-trip admission primitive over
//! shared stock counters and a fair-order queue, plus single-flight and
//! payment idempotency markers. Backed by Redis + Lua in production; an
//! in-memory fake reproduces the same script-atomic semantics for tests.

pub mod fake;
pub mod redis_cache;
pub mod script;

pub use fake::FakeAtomicCache;
pub use redis_cache::RedisAtomicCache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core_types::{ProductId, UserId};
use crate::errors::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted { position: i64, remaining: i64 },
    Duplicate,
    OutOfStock,
}

/// Value stored under `pay:idem:{K}` — opaque to the cache, round-tripped
/// verbatim on replay so the caller can compare it against a new claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentClaimMeta {
    pub payment_reference: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    FirstClaim,
    AlreadyClaimed(PaymentClaimMeta),
}

#[async_trait]
pub trait AtomicCache: Send + Sync {
    /// Seeds `stock:{P}` to `initial_stock`. Only called once, at product
    /// creation; never overwrites an existing key.
    async fn init_stock(&self, product_id: ProductId, initial_stock: i64) -> Result<(), EngineError>;

    /// Script-atomic admission: single-flight check, stock decrement, fair
    /// queue insert, all-or-nothing from any other evaluator's view.
    async fn try_admit(
        &self,
        product_id: ProductId,
        user_id: &UserId,
        arrival_ms: i64,
    ) -> Result<AdmitOutcome, EngineError>;

    /// Idempotent: `INCR stock`, `ZREM` from the queue, `DEL` the
    /// single-flight marker. Safe to call more than once for the same
    /// `(product_id, user_id)` (L1).
    async fn release_one(&self, product_id: ProductId, user_id: &UserId) -> Result<(), EngineError>;

    /// `SETNX pay:idem:{key}` with a 24h TTL. `AlreadyClaimed` carries the
    /// meta recorded by the original claim, for idempotent-replay
    /// comparison (L2).
    async fn claim_payment(&self, key: &str, meta: &PaymentClaimMeta) -> Result<ClaimOutcome, EngineError>;
}
