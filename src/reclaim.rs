//! Reclaim Loop (C3): expires `ACTIVE` slots past their deadline and a
//! slower reconciliation pass that re-releases anything the fast loop
//! missed. Grounded on `internal_transfer::db::find_stale`'s
//! scan-then-fix-up idiom, run as a long-lived background task the way
//! the websocket broadcast service runs its own `tick`-driven loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::audit::{AuditEntry, AuditLog};
use crate::cache::AtomicCache;
use crate::core_types::TraceId;
use crate::errors::EngineError;
use crate::events::{DomainEvent, EventEmitter};
use crate::slot::{ReclaimKind, SlotRepository, SlotStatus};

pub struct ReclaimLoop {
    slots: Arc<dyn SlotRepository>,
    cache: Arc<dyn AtomicCache>,
    audit: Arc<dyn AuditLog>,
    events: Arc<dyn EventEmitter>,
    interval: Duration,
    batch: i64,
}

impl ReclaimLoop {
    pub fn new(
        slots: Arc<dyn SlotRepository>,
        cache: Arc<dyn AtomicCache>,
        audit: Arc<dyn AuditLog>,
        events: Arc<dyn EventEmitter>,
        interval: Duration,
        batch: i64,
    ) -> Self {
        Self {
            slots,
            cache,
            audit,
            events,
            interval,
            batch,
        }
    }

    /// Runs until the process shuts down. Never returns under normal
    /// operation; a tick that errors is logged and retried on the next
    /// interval rather than killing the task.
    pub async fn run(&self) -> ! {
        let mut tick = tokio::time::interval(self.interval);
        tracing::info!(interval_secs = self.interval.as_secs(), "reclaim loop started");

        loop {
            tick.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "reclaim tick failed, retrying next interval");
            }
        }
    }

    /// One pass over `ACTIVE` slots past `expires_at`, oldest first.
    pub async fn tick(&self) -> Result<usize, EngineError> {
        let now = Utc::now();
        let expired = self.slots.find_expired_active(now, self.batch).await?;
        let mut reclaimed = 0;

        for slot in expired {
            let trace_id = TraceId::new();

            // Re-read via CAS: a concurrent payment may have already won.
            let transitioned = self
                .slots
                .transition(slot.slot_id, SlotStatus::Active, SlotStatus::Expired, Some(ReclaimKind::Auto))
                .await?;
            if !transitioned {
                continue;
            }

            // Durable transition precedes cache release (§4.3): a crash
            // here leaves cache stock lower than truth, which under-admits
            // rather than over-admits.
            self.cache.release_one(slot.product_id, &slot.user_id).await?;
            self.slots.mark_cache_released(slot.slot_id).await?;

            self.audit
                .record(&AuditEntry::new(
                    slot.slot_id,
                    Some(SlotStatus::Active),
                    SlotStatus::Expired,
                    now,
                    trace_id.clone(),
                    json!({ "reclaim_kind": "AUTO" }),
                ))
                .await?;

            self.events
                .emit(
                    DomainEvent::SlotExpired {
                        slot_id: slot.slot_id,
                        product_id: slot.product_id,
                        user_id: slot.user_id.clone(),
                        reclaim_kind: "AUTO",
                    },
                    &trace_id,
                )
                .await;

            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Runs [`reconcile`](Self::reconcile) until the process shuts down, on
    /// its own slower cadence — a crash between `tick`'s durable transition
    /// and its cache release is the case this loop exists to catch, and
    /// `tick` running more often does not make it redundant.
    pub async fn run_reconcile(&self, interval: Duration, limit: i64) -> ! {
        let mut tick = tokio::time::interval(interval);
        tracing::info!(interval_secs = interval.as_secs(), "reconciliation loop started");

        loop {
            tick.tick().await;
            match self.reconcile(limit).await {
                Ok(n) if n > 0 => tracing::info!(reconciled = n, "reconciliation pass released stranded slots"),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "reconciliation pass failed, retrying next interval"),
            }
        }
    }

    /// Slower reconciliation pass (§4.3): re-releases any slot that is
    /// already `EXPIRED` in the durable store but whose cache release never
    /// completed (e.g. a crash between transition and release). Queries
    /// `cache_released = false` directly rather than re-deriving expiry,
    /// since an `EXPIRED` row is, by construction, already past its deadline.
    /// Safe to call repeatedly — `ReleaseOne` is idempotent (L1).
    pub async fn reconcile(&self, limit: i64) -> Result<usize, EngineError> {
        let stranded = self.slots.find_expired_unreleased(limit).await?;
        let mut reconciled = 0;

        for slot in &stranded {
            self.cache.release_one(slot.product_id, &slot.user_id).await?;
            if self.slots.mark_cache_released(slot.slot_id).await? {
                reconciled += 1;
            }
        }

        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::FakeAuditLog;
    use crate::cache::{AdmitOutcome, FakeAtomicCache};
    use crate::core_types::{ProductId, UserId};
    use crate::events::NullEventEmitter;
    use crate::slot::{FakeSlotRepository, PurchaseSlot};

    fn loop_with(
        slots: Arc<FakeSlotRepository>,
        cache: Arc<FakeAtomicCache>,
    ) -> ReclaimLoop {
        ReclaimLoop::new(
            slots,
            cache,
            Arc::new(FakeAuditLog::new()),
            Arc::new(NullEventEmitter::new()),
            Duration::from_secs(10),
            500,
        )
    }

    #[tokio::test]
    async fn tick_expires_due_slots_and_releases_stock() {
        let slots = Arc::new(FakeSlotRepository::new());
        let cache = Arc::new(FakeAtomicCache::new());
        let product = ProductId::new();
        let user = UserId::from("u1");
        cache.init_stock(product, 1).await.unwrap();
        cache.try_admit(product, &user, 1000).await.unwrap();

        let mut slot = PurchaseSlot::new(product, user.clone(), Utc::now() - chrono::Duration::minutes(31), 30, Some(1), TraceId::new());
        slot.expires_at = Utc::now() - chrono::Duration::seconds(1);
        slots.insert(&slot).await.unwrap();

        let reclaim = loop_with(slots.clone(), cache.clone());
        let reclaimed = reclaim.tick().await.unwrap();
        assert_eq!(reclaimed, 1);

        assert_eq!(slots.get(slot.slot_id).await.unwrap().unwrap().status, SlotStatus::Expired);

        let admitted = cache.try_admit(product, &UserId::from("u2"), 2000).await.unwrap();
        assert!(matches!(admitted, AdmitOutcome::Admitted { remaining: 0, .. }));
    }

    #[tokio::test]
    async fn tick_skips_slot_already_completed_concurrently() {
        let slots = Arc::new(FakeSlotRepository::new());
        let cache = Arc::new(FakeAtomicCache::new());
        let product = ProductId::new();
        let user = UserId::from("u1");

        let mut slot = PurchaseSlot::new(product, user, Utc::now() - chrono::Duration::minutes(31), 30, Some(1), TraceId::new());
        slot.expires_at = Utc::now() - chrono::Duration::seconds(1);
        slots.insert(&slot).await.unwrap();
        slots
            .transition(slot.slot_id, SlotStatus::Active, SlotStatus::Completed, None)
            .await
            .unwrap();

        let reclaim = loop_with(slots.clone(), cache);
        let reclaimed = reclaim.tick().await.unwrap();
        assert_eq!(reclaimed, 0);
        assert_eq!(slots.get(slot.slot_id).await.unwrap().unwrap().status, SlotStatus::Completed);
    }
}
