use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use crate::core_types::{ProductId, UserId};
use crate::errors::EngineError;

use super::{AdmitOutcome, AtomicCache, ClaimOutcome, PaymentClaimMeta};

#[derive(Default)]
struct ProductState {
    stock: i64,
    initial_stock: i64,
    queue: BTreeSet<(i64, UserId)>,
    single_flight: HashSet<UserId>,
}

/// In-memory model of the Atomic Cache with the same script-atomic
/// semantics, guarded by a single mutex so each operation is indivisible
/// from the caller's point of view — mirroring the Lua script's guarantee
/// without requiring a live Redis instance in tests.
#[derive(Default)]
pub struct FakeAtomicCache {
    products: Mutex<HashMap<ProductId, ProductState>>,
    idempotency: Mutex<HashMap<String, PaymentClaimMeta>>,
}

impl FakeAtomicCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AtomicCache for FakeAtomicCache {
    async fn init_stock(&self, product_id: ProductId, initial_stock: i64) -> Result<(), EngineError> {
        let mut products = self.products.lock().unwrap();
        products.entry(product_id).or_insert(ProductState {
            stock: initial_stock,
            initial_stock,
            queue: BTreeSet::new(),
            single_flight: HashSet::new(),
        });
        Ok(())
    }

    async fn try_admit(
        &self,
        product_id: ProductId,
        user_id: &UserId,
        arrival_ms: i64,
    ) -> Result<AdmitOutcome, EngineError> {
        let mut products = self.products.lock().unwrap();
        let state = products
            .entry(product_id)
            .or_insert_with(ProductState::default);

        if state.single_flight.contains(user_id) {
            return Ok(AdmitOutcome::Duplicate);
        }
        if state.stock <= 0 {
            return Ok(AdmitOutcome::OutOfStock);
        }

        state.stock -= 1;
        state.queue.insert((arrival_ms, user_id.clone()));
        state.single_flight.insert(user_id.clone());

        let position = state
            .queue
            .iter()
            .position(|(_, u)| u == user_id)
            .expect("just inserted") as i64
            + 1;

        Ok(AdmitOutcome::Admitted {
            position,
            remaining: state.stock,
        })
    }

    async fn release_one(&self, product_id: ProductId, user_id: &UserId) -> Result<(), EngineError> {
        let mut products = self.products.lock().unwrap();
        let Some(state) = products.get_mut(&product_id) else {
            return Ok(());
        };

        let removed = state.queue.iter().find(|(_, u)| u == user_id).cloned();
        state.single_flight.remove(user_id);

        if let Some(entry) = removed {
            state.queue.remove(&entry);
            if state.stock < state.initial_stock {
                state.stock += 1;
            }
        }

        Ok(())
    }

    async fn claim_payment(&self, key: &str, meta: &PaymentClaimMeta) -> Result<ClaimOutcome, EngineError> {
        let mut idempotency = self.idempotency.lock().unwrap();
        if let Some(existing) = idempotency.get(key) {
            return Ok(ClaimOutcome::AlreadyClaimed(existing.clone()));
        }
        idempotency.insert(key.to_string(), meta.clone());
        Ok(ClaimOutcome::FirstClaim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_flight_rejects_second_admission_for_same_user() {
        let cache = FakeAtomicCache::new();
        let product = ProductId::new();
        let user = UserId::from("u1");
        cache.init_stock(product, 5).await.unwrap();

        let first = cache.try_admit(product, &user, 1000).await.unwrap();
        assert!(matches!(first, AdmitOutcome::Admitted { .. }));

        let second = cache.try_admit(product, &user, 1001).await.unwrap();
        assert_eq!(second, AdmitOutcome::Duplicate);
    }

    #[tokio::test]
    async fn admission_stops_exactly_at_stock_boundary() {
        let cache = FakeAtomicCache::new();
        let product = ProductId::new();
        cache.init_stock(product, 2).await.unwrap();

        assert!(matches!(
            cache.try_admit(product, &UserId::from("u1"), 1000).await.unwrap(),
            AdmitOutcome::Admitted { .. }
        ));
        assert!(matches!(
            cache.try_admit(product, &UserId::from("u2"), 1001).await.unwrap(),
            AdmitOutcome::Admitted { .. }
        ));
        assert_eq!(
            cache.try_admit(product, &UserId::from("u3"), 1002).await.unwrap(),
            AdmitOutcome::OutOfStock
        );
    }

    #[tokio::test]
    async fn release_one_is_idempotent() {
        let cache = FakeAtomicCache::new();
        let product = ProductId::new();
        let user = UserId::from("u1");
        cache.init_stock(product, 1).await.unwrap();
        cache.try_admit(product, &user, 1000).await.unwrap();

        cache.release_one(product, &user).await.unwrap();
        cache.release_one(product, &user).await.unwrap();

        // A second release must not push stock above initial_stock.
        let remaining = match cache.try_admit(product, &UserId::from("u2"), 1001).await.unwrap() {
            AdmitOutcome::Admitted { remaining, .. } => remaining,
            other => panic!("expected Admitted, got {other:?}"),
        };
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn claim_payment_returns_prior_meta_on_replay() {
        let cache = FakeAtomicCache::new();
        let meta = PaymentClaimMeta {
            payment_reference: "ref-1".into(),
            status: "SUCCESS".into(),
        };

        assert_eq!(
            cache.claim_payment("K", &meta).await.unwrap(),
            ClaimOutcome::FirstClaim
        );
        assert_eq!(
            cache.claim_payment("K", &meta).await.unwrap(),
            ClaimOutcome::AlreadyClaimed(meta)
        );
    }
}
