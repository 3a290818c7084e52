//! Durable persistence for `PurchaseSlot`, following the compare-and-set
//! update style of the matching engine's `internal_transfer::db::TransferDb`
//! (raw `sqlx::query`/`.bind()`, not the `query_as!` macro, so the crate
//! compiles without a live database to check against).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::core_types::{ProductId, SlotId, TraceId, UserId};
use crate::errors::EngineError;

use super::model::{PurchaseSlot, ReclaimKind, SlotStatus};

#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn insert(&self, slot: &PurchaseSlot) -> Result<(), EngineError>;

    async fn get(&self, slot_id: SlotId) -> Result<Option<PurchaseSlot>, EngineError>;

    async fn find_active_by_user_product(
        &self,
        product_id: ProductId,
        user_id: &UserId,
    ) -> Result<Option<PurchaseSlot>, EngineError>;

    /// Compare-and-set transition. Returns `true` iff the row was found in
    /// `expected` and moved to `new`; `false` means another worker already
    /// won the race (the caller should treat this as a no-op, not an error).
    async fn transition(
        &self,
        slot_id: SlotId,
        expected: SlotStatus,
        new: SlotStatus,
        reclaim_kind: Option<ReclaimKind>,
    ) -> Result<bool, EngineError>;

    /// Slots where `status = ACTIVE AND expires_at <= now`, oldest first,
    /// capped at `limit` rows — the reclaim loop's poll query.
    async fn find_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PurchaseSlot>, EngineError>;

    /// Slots where `status = EXPIRED AND cache_released = false`, capped at
    /// `limit` rows — the reconciliation pass's poll query (§4.3). Distinct
    /// from `find_expired_active`: this finds slots the fast loop already
    /// transitioned but whose `ReleaseOne` never completed.
    async fn find_expired_unreleased(&self, limit: i64) -> Result<Vec<PurchaseSlot>, EngineError>;

    /// Idempotently marks a slot's cache release as done. Returns `true` iff
    /// this call is the one that flipped it (`false` means it was already
    /// marked, or the slot doesn't exist).
    async fn mark_cache_released(&self, slot_id: SlotId) -> Result<bool, EngineError>;

    /// Count of `ACTIVE ∪ COMPLETED` slots for a product — the durable side
    /// of the two-sources-of-truth reconciliation.
    async fn count_active_or_completed(&self, product_id: ProductId) -> Result<i64, EngineError>;
}

pub struct PgSlotRepository {
    pool: PgPool,
}

impl PgSlotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_slot(row: &sqlx::postgres::PgRow) -> Result<PurchaseSlot, EngineError> {
        let status_str: String = row.get("status");
        let status = SlotStatus::from_str_opt(&status_str)
            .ok_or_else(|| EngineError::Fatal(format!("invalid slot status in row: {status_str}")))?;

        let reclaim_kind = row
            .get::<Option<String>, _>("reclaim_kind")
            .and_then(|s| ReclaimKind::from_str_opt(&s));

        let slot_id: uuid::Uuid = row.get("slot_id");
        let product_id: uuid::Uuid = row.get("product_id");

        Ok(PurchaseSlot {
            slot_id: SlotId(slot_id),
            product_id: ProductId(product_id),
            user_id: UserId(row.get("user_id")),
            status,
            acquired_at: row.get("acquired_at"),
            expires_at: row.get("expires_at"),
            reclaim_kind,
            position_hint: row.get("position_hint"),
            trace_id: TraceId(row.get("trace_id")),
            cache_released: row.get("cache_released"),
        })
    }
}

#[async_trait]
impl SlotRepository for PgSlotRepository {
    async fn insert(&self, slot: &PurchaseSlot) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO purchase_slots
                (slot_id, product_id, user_id, status, acquired_at, expires_at,
                 reclaim_kind, position_hint, trace_id, cache_released)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(slot.slot_id.inner())
        .bind(slot.product_id.inner())
        .bind(&slot.user_id.0)
        .bind(slot.status.as_str())
        .bind(slot.acquired_at)
        .bind(slot.expires_at)
        .bind(slot.reclaim_kind.map(|k| k.as_str()))
        .bind(slot.position_hint)
        .bind(&slot.trace_id.0)
        .bind(slot.cache_released)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, slot_id: SlotId) -> Result<Option<PurchaseSlot>, EngineError> {
        let row = sqlx::query("SELECT * FROM purchase_slots WHERE slot_id = $1")
            .bind(slot_id.inner())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_slot).transpose()
    }

    async fn find_active_by_user_product(
        &self,
        product_id: ProductId,
        user_id: &UserId,
    ) -> Result<Option<PurchaseSlot>, EngineError> {
        let row = sqlx::query(
            "SELECT * FROM purchase_slots WHERE product_id = $1 AND user_id = $2 AND status = 'ACTIVE'",
        )
        .bind(product_id.inner())
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_slot).transpose()
    }

    async fn transition(
        &self,
        slot_id: SlotId,
        expected: SlotStatus,
        new: SlotStatus,
        reclaim_kind: Option<ReclaimKind>,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_slots
            SET status = $1, reclaim_kind = $2
            WHERE slot_id = $3 AND status = $4
            "#,
        )
        .bind(new.as_str())
        .bind(reclaim_kind.map(|k| k.as_str()))
        .bind(slot_id.inner())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PurchaseSlot>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM purchase_slots
            WHERE status = 'ACTIVE' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_slot).collect()
    }

    async fn find_expired_unreleased(&self, limit: i64) -> Result<Vec<PurchaseSlot>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM purchase_slots
            WHERE status = 'EXPIRED' AND cache_released = FALSE
            ORDER BY expires_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_slot).collect()
    }

    async fn mark_cache_released(&self, slot_id: SlotId) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE purchase_slots SET cache_released = TRUE WHERE slot_id = $1 AND cache_released = FALSE",
        )
        .bind(slot_id.inner())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_active_or_completed(&self, product_id: ProductId) -> Result<i64, EngineError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM purchase_slots WHERE product_id = $1 AND status IN ('ACTIVE', 'COMPLETED')",
        )
        .bind(product_id.inner())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// In-memory model of the same semantics, for unit and scenario tests that
/// run without a live Postgres instance.
#[derive(Default)]
pub struct FakeSlotRepository {
    slots: Mutex<HashMap<SlotId, PurchaseSlot>>,
}

impl FakeSlotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotRepository for FakeSlotRepository {
    async fn insert(&self, slot: &PurchaseSlot) -> Result<(), EngineError> {
        self.slots.lock().unwrap().insert(slot.slot_id, slot.clone());
        Ok(())
    }

    async fn get(&self, slot_id: SlotId) -> Result<Option<PurchaseSlot>, EngineError> {
        Ok(self.slots.lock().unwrap().get(&slot_id).cloned())
    }

    async fn find_active_by_user_product(
        &self,
        product_id: ProductId,
        user_id: &UserId,
    ) -> Result<Option<PurchaseSlot>, EngineError> {
        Ok(self
            .slots
            .lock()
            .unwrap()
            .values()
            .find(|s| s.product_id == product_id && &s.user_id == user_id && s.status == SlotStatus::Active)
            .cloned())
    }

    async fn transition(
        &self,
        slot_id: SlotId,
        expected: SlotStatus,
        new: SlotStatus,
        reclaim_kind: Option<ReclaimKind>,
    ) -> Result<bool, EngineError> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(&slot_id) {
            Some(slot) if slot.status == expected => {
                slot.status = new;
                slot.reclaim_kind = reclaim_kind;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PurchaseSlot>, EngineError> {
        let mut result: Vec<PurchaseSlot> = self
            .slots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == SlotStatus::Active && s.expires_at <= now)
            .cloned()
            .collect();
        result.sort_by_key(|s| s.expires_at);
        result.truncate(limit.max(0) as usize);
        Ok(result)
    }

    async fn find_expired_unreleased(&self, limit: i64) -> Result<Vec<PurchaseSlot>, EngineError> {
        let mut result: Vec<PurchaseSlot> = self
            .slots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == SlotStatus::Expired && !s.cache_released)
            .cloned()
            .collect();
        result.sort_by_key(|s| s.expires_at);
        result.truncate(limit.max(0) as usize);
        Ok(result)
    }

    async fn mark_cache_released(&self, slot_id: SlotId) -> Result<bool, EngineError> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(&slot_id) {
            Some(slot) if !slot.cache_released => {
                slot.cache_released = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_active_or_completed(&self, product_id: ProductId) -> Result<i64, EngineError> {
        Ok(self
            .slots
            .lock()
            .unwrap()
            .values()
            .filter(|s| {
                s.product_id == product_id
                    && matches!(s.status, SlotStatus::Active | SlotStatus::Completed)
            })
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(product: ProductId, user: &str, status: SlotStatus) -> PurchaseSlot {
        let mut s = PurchaseSlot::new(product, UserId::from(user), Utc::now(), 30, None, TraceId::new());
        s.status = status;
        s
    }

    #[tokio::test]
    async fn transition_fails_when_expected_status_does_not_match() {
        let repo = FakeSlotRepository::new();
        let s = slot(ProductId::new(), "u1", SlotStatus::Active);
        let id = s.slot_id;
        repo.insert(&s).await.unwrap();

        let ok = repo
            .transition(id, SlotStatus::Completed, SlotStatus::Expired, Some(ReclaimKind::Auto))
            .await
            .unwrap();
        assert!(!ok);

        let ok = repo
            .transition(id, SlotStatus::Active, SlotStatus::Expired, Some(ReclaimKind::Auto))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(repo.get(id).await.unwrap().unwrap().status, SlotStatus::Expired);
    }

    #[tokio::test]
    async fn find_expired_active_orders_by_expiry_and_respects_limit() {
        let repo = FakeSlotRepository::new();
        let product = ProductId::new();
        let now = Utc::now();
        for i in 0..5 {
            let mut s = slot(product, &format!("u{i}"), SlotStatus::Active);
            s.expires_at = now - chrono::Duration::seconds(5 - i);
            repo.insert(&s).await.unwrap();
        }
        let expired = repo.find_expired_active(now, 3).await.unwrap();
        assert_eq!(expired.len(), 3);
        assert!(expired.windows(2).all(|w| w[0].expires_at <= w[1].expires_at));
    }

    #[tokio::test]
    async fn find_expired_unreleased_ignores_already_released_rows() {
        let repo = FakeSlotRepository::new();
        let product = ProductId::new();
        let mut released = slot(product, "u1", SlotStatus::Expired);
        released.cache_released = true;
        let unreleased = slot(product, "u2", SlotStatus::Expired);
        repo.insert(&released).await.unwrap();
        repo.insert(&unreleased).await.unwrap();

        let found = repo.find_expired_unreleased(10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slot_id, unreleased.slot_id);
    }

    #[tokio::test]
    async fn mark_cache_released_is_cas() {
        let repo = FakeSlotRepository::new();
        let s = slot(ProductId::new(), "u1", SlotStatus::Expired);
        let id = s.slot_id;
        repo.insert(&s).await.unwrap();

        assert!(repo.mark_cache_released(id).await.unwrap());
        assert!(!repo.mark_cache_released(id).await.unwrap());
        assert!(repo.get(id).await.unwrap().unwrap().cache_released);
    }

    #[tokio::test]
    async fn count_active_or_completed_excludes_expired() {
        let repo = FakeSlotRepository::new();
        let product = ProductId::new();
        repo.insert(&slot(product, "u1", SlotStatus::Active)).await.unwrap();
        repo.insert(&slot(product, "u2", SlotStatus::Completed)).await.unwrap();
        repo.insert(&slot(product, "u3", SlotStatus::Expired)).await.unwrap();
        assert_eq!(repo.count_active_or_completed(product).await.unwrap(), 2);
    }
}
