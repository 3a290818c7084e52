use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::core_types::{ProductId, SlotId, UserId};
use crate::errors::EngineError;

use super::model::{PaymentStatus, Purchase};

#[async_trait]
pub trait PurchaseRepository: Send + Sync {
    /// Idempotent insert keyed on `idempotency_key`. Returns `true` if a new
    /// row was inserted, `false` if one already existed (P5: at most one row
    /// per `idempotency_key`).
    async fn insert(&self, purchase: &Purchase) -> Result<bool, EngineError>;

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Purchase>, EngineError>;

    async fn get_by_slot(&self, slot_id: SlotId) -> Result<Option<Purchase>, EngineError>;

    async fn transition_payment_status(
        &self,
        idempotency_key: &str,
        expected: PaymentStatus,
        new: PaymentStatus,
        failure_reason: Option<&str>,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, EngineError>;

    /// Purchases stuck `PENDING` past the payment timeout, for the sweeper.
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Purchase>, EngineError>;
}

pub struct PgPurchaseRepository {
    pool: PgPool,
}

impl PgPurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_purchase(row: &sqlx::postgres::PgRow) -> Result<Purchase, EngineError> {
        let status_str: String = row.get("payment_status");
        let payment_status = PaymentStatus::from_str_opt(&status_str)
            .ok_or_else(|| EngineError::Fatal(format!("invalid payment status in row: {status_str}")))?;

        let purchase_id: uuid::Uuid = row.get("purchase_id");
        let slot_id: uuid::Uuid = row.get("slot_id");
        let product_id: uuid::Uuid = row.get("product_id");
        let amount: Decimal = row.get("amount");

        Ok(Purchase {
            purchase_id: crate::core_types::PurchaseId(purchase_id),
            slot_id: SlotId(slot_id),
            user_id: UserId(row.get("user_id")),
            product_id: ProductId(product_id),
            amount,
            payment_reference: row.get("payment_reference"),
            idempotency_key: row.get("idempotency_key"),
            gateway_event_id: row.get("gateway_event_id"),
            payment_status,
            confirmed_at: row.get("confirmed_at"),
            failure_reason: row.get("failure_reason"),
        })
    }
}

#[async_trait]
impl PurchaseRepository for PgPurchaseRepository {
    async fn insert(&self, purchase: &Purchase) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO purchases
                (purchase_id, slot_id, user_id, product_id, amount, payment_reference,
                 idempotency_key, gateway_event_id, payment_status, confirmed_at, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(purchase.purchase_id.inner())
        .bind(purchase.slot_id.inner())
        .bind(&purchase.user_id.0)
        .bind(purchase.product_id.inner())
        .bind(purchase.amount)
        .bind(&purchase.payment_reference)
        .bind(&purchase.idempotency_key)
        .bind(&purchase.gateway_event_id)
        .bind(purchase.payment_status.as_str())
        .bind(purchase.confirmed_at)
        .bind(&purchase.failure_reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Purchase>, EngineError> {
        let row = sqlx::query("SELECT * FROM purchases WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_purchase).transpose()
    }

    async fn get_by_slot(&self, slot_id: SlotId) -> Result<Option<Purchase>, EngineError> {
        let row = sqlx::query("SELECT * FROM purchases WHERE slot_id = $1")
            .bind(slot_id.inner())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_purchase).transpose()
    }

    async fn transition_payment_status(
        &self,
        idempotency_key: &str,
        expected: PaymentStatus,
        new: PaymentStatus,
        failure_reason: Option<&str>,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET payment_status = $1, failure_reason = $2, confirmed_at = COALESCE($3, confirmed_at)
            WHERE idempotency_key = $4 AND payment_status = $5
            "#,
        )
        .bind(new.as_str())
        .bind(failure_reason)
        .bind(confirmed_at)
        .bind(idempotency_key)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Purchase>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM purchases
            WHERE payment_status = 'PENDING' AND created_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_purchase).collect()
    }
}

#[derive(Default)]
pub struct FakePurchaseRepository {
    by_key: Mutex<HashMap<String, Purchase>>,
}

impl FakePurchaseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PurchaseRepository for FakePurchaseRepository {
    async fn insert(&self, purchase: &Purchase) -> Result<bool, EngineError> {
        let mut map = self.by_key.lock().unwrap();
        if map.contains_key(&purchase.idempotency_key) {
            return Ok(false);
        }
        map.insert(purchase.idempotency_key.clone(), purchase.clone());
        Ok(true)
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Purchase>, EngineError> {
        Ok(self.by_key.lock().unwrap().get(key).cloned())
    }

    async fn get_by_slot(&self, slot_id: SlotId) -> Result<Option<Purchase>, EngineError> {
        Ok(self
            .by_key
            .lock()
            .unwrap()
            .values()
            .find(|p| p.slot_id == slot_id)
            .cloned())
    }

    async fn transition_payment_status(
        &self,
        idempotency_key: &str,
        expected: PaymentStatus,
        new: PaymentStatus,
        failure_reason: Option<&str>,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, EngineError> {
        let mut map = self.by_key.lock().unwrap();
        match map.get_mut(idempotency_key) {
            Some(p) if p.payment_status == expected => {
                p.payment_status = new;
                p.failure_reason = failure_reason.map(|s| s.to_string());
                if confirmed_at.is_some() {
                    p.confirmed_at = confirmed_at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Purchase>, EngineError> {
        let _ = older_than; // the fake has no created_at clock; callers filter by status only
        let mut result: Vec<Purchase> = self
            .by_key
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.payment_status == PaymentStatus::Pending)
            .cloned()
            .collect();
        result.truncate(limit.max(0) as usize);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase(key: &str, slot: SlotId, status: PaymentStatus) -> Purchase {
        Purchase {
            purchase_id: crate::core_types::PurchaseId::new(),
            slot_id: slot,
            user_id: UserId::from("u1"),
            product_id: ProductId::new(),
            amount: Decimal::new(9900, 2),
            payment_reference: "ref".into(),
            idempotency_key: key.into(),
            gateway_event_id: None,
            payment_status: status,
            confirmed_at: None,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_idempotency_key() {
        let repo = FakePurchaseRepository::new();
        let p1 = purchase("K", SlotId::new(), PaymentStatus::Success);
        assert!(repo.insert(&p1).await.unwrap());

        let p2 = purchase("K", SlotId::new(), PaymentStatus::Success);
        assert!(!repo.insert(&p2).await.unwrap());
    }

    #[tokio::test]
    async fn insert_allows_two_purchases_on_the_same_slot() {
        // Scenario 5: a FAILED attempt followed by a SUCCESS retry under a
        // fresh idempotency key both persist against one slot_id.
        let repo = FakePurchaseRepository::new();
        let slot_id = SlotId::new();
        let failed = purchase("idem-1", slot_id, PaymentStatus::Failed);
        let succeeded = purchase("idem-2", slot_id, PaymentStatus::Success);

        assert!(repo.insert(&failed).await.unwrap());
        assert!(repo.insert(&succeeded).await.unwrap());
        assert_eq!(repo.get_by_slot(slot_id).await.unwrap().unwrap().slot_id, slot_id);
    }

    #[tokio::test]
    async fn transition_payment_status_is_cas() {
        let repo = FakePurchaseRepository::new();
        let p = purchase("K", SlotId::new(), PaymentStatus::Pending);
        repo.insert(&p).await.unwrap();

        assert!(
            repo.transition_payment_status("K", PaymentStatus::Pending, PaymentStatus::Failed, Some("PAYMENT_TIMEOUT"), None)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .transition_payment_status("K", PaymentStatus::Pending, PaymentStatus::Success, None, None)
                .await
                .unwrap()
        );
    }
}
