//! Admission Service (C2): the public `AcquireSlot` orchestration — product
//! gate, optional durable pre-check, `TryAdmit`, durable persist with
//! compensating `ReleaseOne` on write failure, audit, non-fatal event
//! emission.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::{AuditEntry, AuditLog};
use crate::cache::{AdmitOutcome, AtomicCache};
use crate::core_types::{ProductId, UserId};
use crate::errors::EngineError;
use crate::events::{DomainEvent, EventEmitter};
use crate::product::{ProductGateway, ProductStatus};
use crate::slot::{PurchaseSlot, SlotRepository, SlotStatus};
use crate::trace::TraceContext;

pub struct AcquiredSlot {
    pub slot_id: crate::core_types::SlotId,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub position: Option<i64>,
}

pub struct AdmissionService {
    products: Arc<dyn ProductGateway>,
    cache: Arc<dyn AtomicCache>,
    slots: Arc<dyn SlotRepository>,
    audit: Arc<dyn AuditLog>,
    events: Arc<dyn EventEmitter>,
    slot_ttl_minutes: i64,
    /// Admission's hard deadline (§5): exceeding it is a `Transient` error
    /// and, if stock was already decremented, triggers a compensating
    /// `ReleaseOne`. Sourced from `AppConfig::admission_deadline_millis`.
    admission_deadline: Duration,
}

impl AdmissionService {
    pub fn new(
        products: Arc<dyn ProductGateway>,
        cache: Arc<dyn AtomicCache>,
        slots: Arc<dyn SlotRepository>,
        audit: Arc<dyn AuditLog>,
        events: Arc<dyn EventEmitter>,
        slot_ttl_minutes: i64,
        admission_deadline: Duration,
    ) -> Self {
        Self {
            products,
            cache,
            slots,
            audit,
            events,
            slot_ttl_minutes,
            admission_deadline,
        }
    }

    pub async fn acquire_slot(
        &self,
        product_id: ProductId,
        user_id: UserId,
        arrival_ms: i64,
        ctx: &TraceContext,
    ) -> Result<AcquiredSlot, EngineError> {
        let deadline = tokio::time::Instant::now() + self.admission_deadline;

        match tokio::time::timeout_at(
            deadline,
            self.acquire_slot_inner(product_id, &user_id, arrival_ms, ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => {
                // Step 3 may or may not have committed before the deadline
                // fired; releasing unconditionally is safe because
                // `ReleaseOne` is idempotent (L1) even if it never admitted.
                self.cache.release_one(product_id, &user_id).await.ok();
                Err(EngineError::Transient("admission deadline exceeded".into()))
            }
        }
    }

    async fn acquire_slot_inner(
        &self,
        product_id: ProductId,
        user_id: &UserId,
        arrival_ms: i64,
        ctx: &TraceContext,
    ) -> Result<AcquiredSlot, EngineError> {
        let now = Utc::now();

        // 1. Product gate.
        let product = self
            .products
            .get(product_id)
            .await?
            .ok_or(EngineError::ProductNotFound(product_id))?;

        match product.status_at(now) {
            ProductStatus::Upcoming => return Err(EngineError::ProductUpcoming(product_id)),
            ProductStatus::SoldOut => return Err(EngineError::ProductSoldOut(product_id)),
            ProductStatus::OnSale => {}
        }

        // 2. Durable single-flight pre-check (optimization; cache is authoritative).
        if self
            .slots
            .find_active_by_user_product(product_id, user_id)
            .await?
            .is_some()
        {
            return Err(EngineError::DuplicateSlot(product_id));
        }

        // 3. TryAdmit on the atomic cache.
        let (position, _remaining) = match self.cache.try_admit(product_id, user_id, arrival_ms).await? {
            AdmitOutcome::Admitted { position, remaining } => (position, remaining),
            AdmitOutcome::Duplicate => return Err(EngineError::DuplicateSlot(product_id)),
            AdmitOutcome::OutOfStock => return Err(EngineError::ProductSoldOut(product_id)),
        };

        // Keeps the product gate's own SOLD_OUT short-circuit live; the
        // cache above remains the authority on exactness.
        self.products.decrement_stock(product_id).await.ok();

        // 4. Persist slot durably; unwind the cache on failure.
        let acquired_at = DateTime::from_timestamp_millis(arrival_ms).unwrap_or(now);
        let slot = PurchaseSlot::new(
            product_id,
            user_id.clone(),
            acquired_at,
            self.slot_ttl_minutes,
            Some(position),
            ctx.trace_id().clone(),
        );

        if let Err(e) = self.slots.insert(&slot).await {
            self.cache.release_one(product_id, user_id).await.ok();
            return Err(EngineError::Transient(format!("durable slot insert failed: {e}")));
        }

        // 5. Audit.
        self.audit
            .record(&AuditEntry::new(
                slot.slot_id,
                None,
                SlotStatus::Active,
                now,
                ctx.trace_id().clone(),
                json!({ "position": position }),
            ))
            .await?;

        // 6. Emit SlotAcquired. Failure here must never fail the admission.
        self.events
            .emit(
                DomainEvent::SlotAcquired {
                    slot_id: slot.slot_id,
                    product_id,
                    user_id: user_id.clone(),
                    expires_at: slot.expires_at,
                    position,
                },
                ctx.trace_id(),
            )
            .await;

        let remaining_seconds = (slot.expires_at - now).num_seconds().max(0);
        Ok(AcquiredSlot {
            slot_id: slot.slot_id,
            expires_at: slot.expires_at,
            remaining_seconds,
            position: Some(position),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::FakeAuditLog;
    use crate::cache::FakeAtomicCache;
    use crate::events::NullEventEmitter;
    use crate::product::FakeProductGateway;
    use crate::slot::FakeSlotRepository;
    use rust_decimal::Decimal;

    fn service() -> (AdmissionService, Arc<FakeProductGateway>, Arc<FakeAtomicCache>) {
        let products = Arc::new(FakeProductGateway::new());
        let cache = Arc::new(FakeAtomicCache::new());
        let slots = Arc::new(FakeSlotRepository::new());
        let audit = Arc::new(FakeAuditLog::new());
        let events = Arc::new(NullEventEmitter::new());

        let svc = AdmissionService::new(
            products.clone(),
            cache.clone(),
            slots,
            audit,
            events,
            30,
            Duration::from_millis(500),
        );
        (svc, products, cache)
    }

    #[tokio::test]
    async fn acquire_slot_succeeds_for_on_sale_product_with_stock() {
        let (svc, products, cache) = service();
        let product = products
            .create("drop".into(), Decimal::new(999, 2), 2, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        cache.init_stock(product.product_id, 2).await.unwrap();

        let ctx = TraceContext::generate();
        let acquired = svc
            .acquire_slot(product.product_id, UserId::from("u1"), 1_000, &ctx)
            .await
            .unwrap();

        assert_eq!(acquired.position, Some(1));
    }

    #[tokio::test]
    async fn acquire_slot_rejects_duplicate_for_same_user() {
        let (svc, products, cache) = service();
        let product = products
            .create("drop".into(), Decimal::new(999, 2), 5, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        cache.init_stock(product.product_id, 5).await.unwrap();

        let ctx = TraceContext::generate();
        svc.acquire_slot(product.product_id, UserId::from("u1"), 1_000, &ctx)
            .await
            .unwrap();

        let err = svc
            .acquire_slot(product.product_id, UserId::from("u1"), 1_001, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateSlot(_)));
    }

    #[tokio::test]
    async fn acquire_slot_rejects_upcoming_product() {
        let (svc, products, _cache) = service();
        let product = products
            .create("drop".into(), Decimal::new(999, 2), 5, Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();

        let ctx = TraceContext::generate();
        let err = svc
            .acquire_slot(product.product_id, UserId::from("u1"), 1_000, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProductUpcoming(_)));
    }

    #[tokio::test]
    async fn acquire_slot_returns_sold_out_past_stock_boundary() {
        let (svc, products, cache) = service();
        let product = products
            .create("drop".into(), Decimal::new(999, 2), 1, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        cache.init_stock(product.product_id, 1).await.unwrap();

        let ctx = TraceContext::generate();
        svc.acquire_slot(product.product_id, UserId::from("u1"), 1_000, &ctx)
            .await
            .unwrap();

        let err = svc
            .acquire_slot(product.product_id, UserId::from("u2"), 1_001, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProductSoldOut(_)));
    }
}
