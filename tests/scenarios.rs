//! End-to-end scenarios wiring the Admission Service, Reclaim Loop, and
//! Payment Confirmer against the in-memory fakes — the same components a
//! live deployment wires against Redis/Postgres/Kafka, exercised here
//! without any of those collaborators running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use slotengine::admission::AdmissionService;
use slotengine::audit::FakeAuditLog;
use slotengine::cache::{AdmitOutcome, AtomicCache, FakeAtomicCache};
use slotengine::core_types::{ProductId, SlotId, TraceId, UserId};
use slotengine::errors::EngineError;
use slotengine::events::NullEventEmitter;
use slotengine::payment::{CallbackOutcome, ConfirmResult, PaymentCallback, PaymentConfirmer};
use slotengine::product::{FakeProductGateway, ProductGateway};
use slotengine::purchase::FakePurchaseRepository;
use slotengine::reclaim::ReclaimLoop;
use slotengine::slot::{FakeSlotRepository, PurchaseSlot, ReclaimKind, SlotRepository, SlotStatus};
use slotengine::trace::TraceContext;

/// Fails the first `insert`, then delegates to the wrapped repository —
/// models a one-shot durable-store outage for scenario 6 without adding
/// fault injection to the shared fake.
struct FlakySlotRepository {
    inner: Arc<FakeSlotRepository>,
    fail_next: AtomicBool,
}

impl FlakySlotRepository {
    fn new(inner: Arc<FakeSlotRepository>) -> Self {
        Self {
            inner,
            fail_next: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl SlotRepository for FlakySlotRepository {
    async fn insert(&self, slot: &PurchaseSlot) -> Result<(), EngineError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Store(sqlx::Error::Protocol("durable store unavailable".into())));
        }
        self.inner.insert(slot).await
    }

    async fn get(&self, slot_id: SlotId) -> Result<Option<PurchaseSlot>, EngineError> {
        self.inner.get(slot_id).await
    }

    async fn find_active_by_user_product(
        &self,
        product_id: ProductId,
        user_id: &UserId,
    ) -> Result<Option<PurchaseSlot>, EngineError> {
        self.inner.find_active_by_user_product(product_id, user_id).await
    }

    async fn transition(
        &self,
        slot_id: SlotId,
        expected: SlotStatus,
        new: SlotStatus,
        reclaim_kind: Option<ReclaimKind>,
    ) -> Result<bool, EngineError> {
        self.inner.transition(slot_id, expected, new, reclaim_kind).await
    }

    async fn find_expired_active(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<PurchaseSlot>, EngineError> {
        self.inner.find_expired_active(now, limit).await
    }

    async fn find_expired_unreleased(&self, limit: i64) -> Result<Vec<PurchaseSlot>, EngineError> {
        self.inner.find_expired_unreleased(limit).await
    }

    async fn mark_cache_released(&self, slot_id: SlotId) -> Result<bool, EngineError> {
        self.inner.mark_cache_released(slot_id).await
    }

    async fn count_active_or_completed(&self, product_id: ProductId) -> Result<i64, EngineError> {
        self.inner.count_active_or_completed(product_id).await
    }
}

struct Harness {
    admission: AdmissionService,
    reclaim: ReclaimLoop,
    payments: PaymentConfirmer,
    slots: Arc<FakeSlotRepository>,
    cache: Arc<FakeAtomicCache>,
    product_id: ProductId,
}

async fn harness(stock: i64) -> Harness {
    harness_with_slots(stock, Arc::new(FakeSlotRepository::new())).await
}

async fn harness_with_slots(stock: i64, slots: Arc<FakeSlotRepository>) -> Harness {
    let products = Arc::new(FakeProductGateway::new());
    let cache = Arc::new(FakeAtomicCache::new());
    let purchases = Arc::new(FakePurchaseRepository::new());
    let audit = Arc::new(FakeAuditLog::new());
    let events = Arc::new(NullEventEmitter::new());

    let product = products
        .create(
            "flagship-drop".into(),
            Decimal::new(9900, 2),
            stock,
            Utc::now() - chrono::Duration::minutes(5),
        )
        .await
        .unwrap();
    cache.init_stock(product.product_id, stock).await.unwrap();

    let admission = AdmissionService::new(
        products,
        cache.clone(),
        slots.clone(),
        audit.clone(),
        events.clone(),
        30,
        std::time::Duration::from_millis(500),
    );
    let reclaim = ReclaimLoop::new(
        slots.clone(),
        cache.clone(),
        audit.clone(),
        events.clone(),
        std::time::Duration::from_secs(10),
        500,
    );
    let payments = PaymentConfirmer::new(
        cache.clone(),
        slots.clone(),
        purchases,
        audit,
        events,
        b"secret".to_vec(),
        std::time::Duration::from_secs(5 * 60),
    );

    Harness {
        admission,
        reclaim,
        payments,
        slots,
        cache,
        product_id: product.product_id,
    }
}

/// Scenario 1: admission fills stock then rejects the next arrival.
#[tokio::test]
async fn scenario_1_sold_out_after_stock_exhausted() {
    let h = harness(2).await;
    let ctx = TraceContext::generate();

    let u1 = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u1"), 1000, &ctx)
        .await
        .unwrap();
    assert_eq!(u1.position, Some(1));

    let u2 = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u2"), 1001, &ctx)
        .await
        .unwrap();
    assert_eq!(u2.position, Some(2));

    let u3 = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u3"), 1002, &ctx)
        .await;
    assert!(matches!(u3, Err(EngineError::ProductSoldOut(_))));
}

/// Scenario 2: the same user cannot hold a second active slot.
#[tokio::test]
async fn scenario_2_duplicate_acquisition_rejected() {
    let h = harness(2).await;
    let ctx = TraceContext::generate();

    h.admission
        .acquire_slot(h.product_id, UserId::from("u1"), 1000, &ctx)
        .await
        .unwrap();

    let replay = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u1"), 1500, &ctx)
        .await;
    assert!(matches!(replay, Err(EngineError::DuplicateSlot(_))));
}

/// Scenario 3: unpaid slots expire on the next reclaim tick and stock is
/// restored to its original ceiling.
#[tokio::test]
async fn scenario_3_unpaid_slots_expire_and_restore_stock() {
    let h = harness(2).await;
    let ctx = TraceContext::generate();

    let u1 = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u1"), 1000, &ctx)
        .await
        .unwrap();
    let u2 = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u2"), 1001, &ctx)
        .await
        .unwrap();

    // Backdate both slots past their TTL, as if 30 minutes had elapsed.
    for slot_id in [u1.slot_id, u2.slot_id] {
        let mut slot = h.slots.get(slot_id).await.unwrap().unwrap();
        slot.expires_at = Utc::now() - chrono::Duration::seconds(1);
        h.slots.insert(&slot).await.unwrap();
    }

    let reclaimed = h.reclaim.tick().await.unwrap();
    assert_eq!(reclaimed, 2);

    for slot_id in [u1.slot_id, u2.slot_id] {
        assert_eq!(h.slots.get(slot_id).await.unwrap().unwrap().status, SlotStatus::Expired);
    }

    let readmit = h
        .cache
        .try_admit(h.product_id, &UserId::from("u3"), 2000)
        .await
        .unwrap();
    assert!(matches!(readmit, AdmitOutcome::Admitted { position: 1, remaining: 1 }));
}

/// Scenario 4: a successful payment completes the slot and is idempotent
/// on replay.
#[tokio::test]
async fn scenario_4_successful_payment_completes_slot_idempotently() {
    let h = harness(2).await;
    let ctx = TraceContext::generate();

    let acquired = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u1"), 1000, &ctx)
        .await
        .unwrap();

    let callback = PaymentCallback {
        slot_id: acquired.slot_id,
        idempotency_key: "K".into(),
        payment_reference: "ref-1".into(),
        gateway_event_id: None,
        amount: Decimal::new(9900, 2),
        outcome: CallbackOutcome::Success,
    };

    let first = h.payments.confirm(callback.clone(), &ctx).await.unwrap();
    assert_eq!(first, ConfirmResult::Completed);
    assert_eq!(h.slots.get(acquired.slot_id).await.unwrap().unwrap().status, SlotStatus::Completed);

    let replay = h.payments.confirm(callback, &ctx).await.unwrap();
    assert_eq!(replay, ConfirmResult::Replayed);
}

/// Scenario 5: a failed payment leaves the slot active for a retry with a
/// fresh idempotency key.
#[tokio::test]
async fn scenario_5_failed_payment_keeps_slot_active_for_retry() {
    let h = harness(2).await;
    let ctx = TraceContext::generate();

    let acquired = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u1"), 1000, &ctx)
        .await
        .unwrap();

    let failed = PaymentCallback {
        slot_id: acquired.slot_id,
        idempotency_key: "K".into(),
        payment_reference: "ref-1".into(),
        gateway_event_id: None,
        amount: Decimal::new(9900, 2),
        outcome: CallbackOutcome::Failed,
    };
    let result = h.payments.confirm(failed, &ctx).await.unwrap();
    assert_eq!(result, ConfirmResult::Failed);
    assert_eq!(h.slots.get(acquired.slot_id).await.unwrap().unwrap().status, SlotStatus::Active);

    let retry = PaymentCallback {
        slot_id: acquired.slot_id,
        idempotency_key: "K-prime".into(),
        payment_reference: "ref-2".into(),
        gateway_event_id: None,
        amount: Decimal::new(9900, 2),
        outcome: CallbackOutcome::Success,
    };
    let completed = h.payments.confirm(retry, &ctx).await.unwrap();
    assert_eq!(completed, ConfirmResult::Completed);
}

/// Scenario 6: a durable-store failure during admission compensates by
/// releasing the cache slot, so the next arrival still observes full stock.
#[tokio::test]
async fn scenario_6_durable_write_failure_compensates_with_release() {
    let flaky = Arc::new(FlakySlotRepository::new(Arc::new(FakeSlotRepository::new())));
    let h = harness_with_slots_dyn(2, flaky).await;
    let ctx = TraceContext::generate();

    let failed = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u1"), 1000, &ctx)
        .await;
    assert!(matches!(failed, Err(EngineError::Transient(_))));

    let u2 = h
        .admission
        .acquire_slot(h.product_id, UserId::from("u2"), 1001, &ctx)
        .await
        .unwrap();
    assert_eq!(u2.position, Some(1));
}

/// Scenario 7: reconciliation finds a durably-EXPIRED slot whose cache
/// release never completed (the crash window between `tick`'s durable
/// transition and its `ReleaseOne` call) and releases it.
#[tokio::test]
async fn scenario_7_reconcile_releases_stranded_expired_slot() {
    let h = harness(1).await;
    let user = UserId::from("u1");

    let mut slot = PurchaseSlot::new(h.product_id, user.clone(), Utc::now() - chrono::Duration::minutes(31), 30, Some(1), TraceId::new());
    slot.expires_at = Utc::now() - chrono::Duration::seconds(1);
    h.slots.insert(&slot).await.unwrap();
    h.slots
        .transition(slot.slot_id, SlotStatus::Active, SlotStatus::Expired, Some(ReclaimKind::Auto))
        .await
        .unwrap();
    // cache_released stays false: simulates a crash right after the durable
    // transition landed but before ReleaseOne ran.
    h.cache.try_admit(h.product_id, &user, 1000).await.unwrap();

    let reconciled = h.reclaim.reconcile(500).await.unwrap();
    assert_eq!(reconciled, 1);
    assert!(h.slots.get(slot.slot_id).await.unwrap().unwrap().cache_released);

    let readmit = h.cache.try_admit(h.product_id, &UserId::from("u2"), 2000).await.unwrap();
    assert!(matches!(readmit, AdmitOutcome::Admitted { position: 1, remaining: 0 }));

    // Idempotent re-run: already-marked rows are not recounted.
    assert_eq!(h.reclaim.reconcile(500).await.unwrap(), 0);
}

/// Variant of the harness that takes a type-erased [`SlotRepository`],
/// for scenario 6's fault-injecting decorator.
struct DynHarness {
    admission: AdmissionService,
    product_id: ProductId,
}

async fn harness_with_slots_dyn(stock: i64, slots: Arc<dyn SlotRepository>) -> DynHarness {
    let products = Arc::new(FakeProductGateway::new());
    let cache = Arc::new(FakeAtomicCache::new());
    let audit = Arc::new(FakeAuditLog::new());
    let events = Arc::new(NullEventEmitter::new());

    let product = products
        .create(
            "flagship-drop".into(),
            Decimal::new(9900, 2),
            stock,
            Utc::now() - chrono::Duration::minutes(5),
        )
        .await
        .unwrap();
    cache.init_stock(product.product_id, stock).await.unwrap();

    let admission = AdmissionService::new(products, cache, slots, audit, events, 30, std::time::Duration::from_millis(500));

    DynHarness {
        admission,
        product_id: product.product_id,
    }
}
