use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::core_types::{ProductId, UserId};
use crate::errors::EngineError;

use super::script::{RELEASE_ONE, TRY_ADMIT};
use super::{AdmitOutcome, AtomicCache, ClaimOutcome, PaymentClaimMeta};

const SINGLE_FLIGHT_TTL_SECONDS: i64 = 30 * 60;
const PAYMENT_IDEMPOTENCY_TTL_SECONDS: i64 = 24 * 60 * 60;

pub struct RedisAtomicCache {
    conn: ConnectionManager,
    try_admit: Script,
    release_one: Script,
}

impl RedisAtomicCache {
    pub async fn connect(redis_url: &str) -> Result<Self, EngineError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;

        Ok(Self {
            conn,
            try_admit: Script::new(TRY_ADMIT),
            release_one: Script::new(RELEASE_ONE),
        })
    }

    fn stock_key(product_id: ProductId) -> String {
        format!("stock:{product_id}")
    }

    fn queue_key(product_id: ProductId) -> String {
        format!("queue:{product_id}")
    }

    fn flight_key(product_id: ProductId, user_id: &UserId) -> String {
        format!("user:{user_id}:product:{product_id}")
    }

    fn idem_key(key: &str) -> String {
        format!("pay:idem:{key}")
    }

    /// Immutable record of `initial_stock`, set once alongside `stock:{P}`.
    /// Kept separate so `release_one`'s increment guard can compare against
    /// the original ceiling rather than the (mutating) current stock.
    fn initial_stock_key(product_id: ProductId) -> String {
        format!("stock:init:{product_id}")
    }
}

#[async_trait]
impl AtomicCache for RedisAtomicCache {
    async fn init_stock(&self, product_id: ProductId, initial_stock: i64) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let _: bool = conn
            .set_nx(Self::stock_key(product_id), initial_stock)
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;
        let _: bool = conn
            .set_nx(Self::initial_stock_key(product_id), initial_stock)
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn try_admit(
        &self,
        product_id: ProductId,
        user_id: &UserId,
        arrival_ms: i64,
    ) -> Result<AdmitOutcome, EngineError> {
        let mut conn = self.conn.clone();
        let result: String = self
            .try_admit
            .key(Self::stock_key(product_id))
            .key(Self::queue_key(product_id))
            .key(Self::flight_key(product_id, user_id))
            .arg(user_id.to_string())
            .arg(arrival_ms)
            .arg(SINGLE_FLIGHT_TTL_SECONDS)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;

        match result.as_str() {
            "DUPLICATE_REQUEST" => Ok(AdmitOutcome::Duplicate),
            "SOLD_OUT" => Ok(AdmitOutcome::OutOfStock),
            position_str => {
                let position: i64 = position_str
                    .parse()
                    .map_err(|_| EngineError::Fatal(format!("malformed TryAdmit reply: {position_str}")))?;
                let remaining: i64 = conn
                    .get(Self::stock_key(product_id))
                    .await
                    .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;
                Ok(AdmitOutcome::Admitted { position, remaining })
            }
        }
    }

    async fn release_one(&self, product_id: ProductId, user_id: &UserId) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        let initial_stock: i64 = conn
            .get(Self::initial_stock_key(product_id))
            .await
            .unwrap_or(0);

        let _: String = self
            .release_one
            .key(Self::stock_key(product_id))
            .key(Self::queue_key(product_id))
            .key(Self::flight_key(product_id, user_id))
            .arg(user_id.to_string())
            .arg(initial_stock)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;

        Ok(())
    }

    async fn claim_payment(&self, key: &str, meta: &PaymentClaimMeta) -> Result<ClaimOutcome, EngineError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(meta)
            .map_err(|e| EngineError::Fatal(format!("cannot serialize payment claim meta: {e}")))?;

        let set: bool = redis::cmd("SET")
            .arg(Self::idem_key(key))
            .arg(&payload)
            .arg("NX")
            .arg("EX")
            .arg(PAYMENT_IDEMPOTENCY_TTL_SECONDS)
            .query_async(&mut conn)
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;

        if set {
            return Ok(ClaimOutcome::FirstClaim);
        }

        let existing: String = conn
            .get(Self::idem_key(key))
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))?;
        let existing_meta: PaymentClaimMeta = serde_json::from_str(&existing)
            .map_err(|e| EngineError::Fatal(format!("corrupt payment claim record: {e}")))?;

        Ok(ClaimOutcome::AlreadyClaimed(existing_meta))
    }
}
