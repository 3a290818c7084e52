use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{ProductId, PurchaseId, SlotId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "SUCCESS" => Some(PaymentStatus::Success),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// A slot may accumulate more than one row over its lifetime (a `FAILED`
/// attempt followed by a `SUCCESS` retry under a fresh idempotency key, per
/// scenario 5); `idempotency_key` alone is globally unique, enforced by the
/// durable store's unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_id: PurchaseId,
    pub slot_id: SlotId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub amount: Decimal,
    pub payment_reference: String,
    pub idempotency_key: String,
    /// Raw provider callback identifier, distinct from `idempotency_key`,
    /// kept for troubleshooting gateway-side replay independent of our own
    /// idempotency guard.
    pub gateway_event_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Purchase {
    /// Row written at the start of `confirm()`, before the outcome is
    /// known, so the timeout sweeper has something durable to find if the
    /// process dies before the final transition lands.
    pub fn pending(
        slot_id: SlotId,
        user_id: UserId,
        product_id: ProductId,
        amount: Decimal,
        payment_reference: String,
        idempotency_key: String,
        gateway_event_id: Option<String>,
    ) -> Self {
        Self {
            purchase_id: PurchaseId::new(),
            slot_id,
            user_id,
            product_id,
            amount,
            payment_reference,
            idempotency_key,
            gateway_event_id,
            payment_status: PaymentStatus::Pending,
            confirmed_at: None,
            failure_reason: None,
        }
    }

    pub fn success(
        slot_id: SlotId,
        user_id: UserId,
        product_id: ProductId,
        amount: Decimal,
        payment_reference: String,
        idempotency_key: String,
        gateway_event_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            purchase_id: PurchaseId::new(),
            slot_id,
            user_id,
            product_id,
            amount,
            payment_reference,
            idempotency_key,
            gateway_event_id,
            payment_status: PaymentStatus::Success,
            confirmed_at: Some(now),
            failure_reason: None,
        }
    }

    pub fn failed(
        slot_id: SlotId,
        user_id: UserId,
        product_id: ProductId,
        amount: Decimal,
        payment_reference: String,
        idempotency_key: String,
        gateway_event_id: Option<String>,
        failure_reason: String,
    ) -> Self {
        let failure_reason = if failure_reason.len() > 500 {
            failure_reason[..500].to_string()
        } else {
            failure_reason
        };

        Self {
            purchase_id: PurchaseId::new(),
            slot_id,
            user_id,
            product_id,
            amount,
            payment_reference,
            idempotency_key,
            gateway_event_id,
            payment_status: PaymentStatus::Failed,
            confirmed_at: None,
            failure_reason: Some(failure_reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_truncated_at_500_chars() {
        let reason = "x".repeat(600);
        let p = Purchase::failed(
            SlotId::new(),
            UserId::from("u1"),
            ProductId::new(),
            Decimal::new(9900, 2),
            "ref".into(),
            "idem".into(),
            None,
            reason,
        );
        assert_eq!(p.failure_reason.unwrap().len(), 500);
    }

    #[test]
    fn success_sets_confirmed_at_and_clears_failure_reason() {
        let now = Utc::now();
        let p = Purchase::success(
            SlotId::new(),
            UserId::from("u1"),
            ProductId::new(),
            Decimal::new(9900, 2),
            "ref".into(),
            "idem".into(),
            None,
            now,
        );
        assert_eq!(p.payment_status, PaymentStatus::Success);
        assert_eq!(p.confirmed_at, Some(now));
        assert!(p.failure_reason.is_none());
    }
}
