//! Domain event emission (C5): publishes `SlotAcquired`, `SlotExpired`,
//! `PaymentCompleted`, `PaymentFailed` to a durable partitioned log with
//! at-least-once delivery. `event_id` is derived deterministically so
//! downstream consumers can deduplicate.

pub mod kafka_emitter;
pub mod null_emitter;

pub use kafka_emitter::KafkaEventEmitter;
pub use null_emitter::NullEventEmitter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core_types::{ProductId, PurchaseId, SlotId, TraceId, UserId};
use crate::errors::EngineError;
use crate::purchase::PaymentStatus;
use crate::slot::SlotStatus;

/// Namespace UUID for deriving `event_id`s; arbitrary but fixed, so the
/// same `(entity, status)` pair always yields the same UUIDv5 regardless
/// of which process emits it.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x3b, 0x4d, 0x21, 0x9a, 0x77, 0x4c, 0x6b, 0x9a, 0x0e, 0x4b, 0x8e, 0x1f, 0x2a, 0x5c, 0x9d,
]);

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    SlotAcquired {
        slot_id: SlotId,
        product_id: ProductId,
        user_id: UserId,
        expires_at: DateTime<Utc>,
        position: i64,
    },
    SlotExpired {
        slot_id: SlotId,
        product_id: ProductId,
        user_id: UserId,
        reclaim_kind: &'static str,
    },
    PaymentCompleted {
        purchase_id: PurchaseId,
        slot_id: SlotId,
        product_id: ProductId,
        user_id: UserId,
    },
    PaymentFailed {
        purchase_id: PurchaseId,
        slot_id: SlotId,
        product_id: ProductId,
        user_id: UserId,
        failure_reason: String,
    },
}

impl DomainEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            DomainEvent::SlotAcquired { product_id, .. }
            | DomainEvent::SlotExpired { product_id, .. }
            | DomainEvent::PaymentCompleted { product_id, .. }
            | DomainEvent::PaymentFailed { product_id, .. } => *product_id,
        }
    }

    /// Deterministic `event_id`: UUIDv5 over `(slot_id, transition_new_status)`
    /// or `(purchase_id, payment_status)`, so redelivery of the same event
    /// always carries the same id.
    pub fn event_id(&self) -> Uuid {
        let seed = match self {
            DomainEvent::SlotAcquired { slot_id, .. } => {
                format!("slot:{slot_id}:{}", SlotStatus::Active)
            }
            DomainEvent::SlotExpired { slot_id, .. } => {
                format!("slot:{slot_id}:{}", SlotStatus::Expired)
            }
            DomainEvent::PaymentCompleted { purchase_id, .. } => {
                format!("purchase:{purchase_id}:{}", PaymentStatus::Success.as_str())
            }
            DomainEvent::PaymentFailed { purchase_id, .. } => {
                format!("purchase:{purchase_id}:{}", PaymentStatus::Failed.as_str())
            }
        };
        Uuid::new_v5(&EVENT_ID_NAMESPACE, seed.as_bytes())
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::SlotAcquired { .. } => "SlotAcquired",
            DomainEvent::SlotExpired { .. } => "SlotExpired",
            DomainEvent::PaymentCompleted { .. } => "PaymentCompleted",
            DomainEvent::PaymentFailed { .. } => "PaymentFailed",
        }
    }

    /// §6's topic list: each variant gets its own named topic rather than
    /// sharing one, so consumers can subscribe to just the events they care
    /// about.
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::SlotAcquired { .. } => "product.slot.acquired",
            DomainEvent::SlotExpired { .. } => "product.slot.expired",
            DomainEvent::PaymentCompleted { .. } => "product.payment.completed",
            DomainEvent::PaymentFailed { .. } => "product.payment.failed",
        }
    }
}

#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emission failure MUST NOT fail the caller's operation (§4.2 step 6);
    /// implementations log and internally retry rather than surfacing the
    /// error up the call chain, hence no `Result` return.
    async fn emit(&self, event: DomainEvent, trace_id: &TraceId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_deterministic_for_same_transition() {
        let slot_id = SlotId::new();
        let product_id = ProductId::new();
        let user_id = UserId::from("u1");
        let e1 = DomainEvent::SlotExpired {
            slot_id,
            product_id,
            user_id: user_id.clone(),
            reclaim_kind: "AUTO",
        };
        let e2 = DomainEvent::SlotExpired {
            slot_id,
            product_id,
            user_id,
            reclaim_kind: "AUTO",
        };
        assert_eq!(e1.event_id(), e2.event_id());
    }

    #[test]
    fn event_id_differs_across_transitions_of_same_slot() {
        let slot_id = SlotId::new();
        let product_id = ProductId::new();
        let user_id = UserId::from("u1");
        let acquired = DomainEvent::SlotAcquired {
            slot_id,
            product_id,
            user_id: user_id.clone(),
            expires_at: Utc::now(),
            position: 1,
        };
        let expired = DomainEvent::SlotExpired {
            slot_id,
            product_id,
            user_id,
            reclaim_kind: "AUTO",
        };
        assert_ne!(acquired.event_id(), expired.event_id());
    }
}
