//! Payment Confirmer (C4): verifies webhook signatures, claims payment
//! idempotency on the Atomic Cache, transitions the slot to `COMPLETED`
//! or leaves it `ACTIVE` with a recorded failure, and sweeps payments
//! stuck `PENDING` past their own (slot-independent) timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;

use crate::audit::{AuditEntry, AuditLog};
use crate::cache::{AtomicCache, ClaimOutcome, PaymentClaimMeta};
use crate::core_types::SlotId;
use crate::errors::EngineError;
use crate::events::{DomainEvent, EventEmitter};
use crate::purchase::{PaymentStatus, Purchase, PurchaseRepository};
use crate::signature;
use crate::slot::{SlotRepository, SlotStatus};
use crate::trace::TraceContext;

#[derive(Debug, Clone)]
pub struct PaymentCallback {
    pub slot_id: SlotId,
    pub idempotency_key: String,
    pub payment_reference: String,
    pub gateway_event_id: Option<String>,
    pub amount: Decimal,
    pub outcome: CallbackOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmResult {
    Completed,
    Failed,
    /// The claim already existed with an equal outcome: idempotent replay.
    Replayed,
    LatePayment,
}

pub struct PaymentConfirmer {
    cache: Arc<dyn AtomicCache>,
    slots: Arc<dyn SlotRepository>,
    purchases: Arc<dyn PurchaseRepository>,
    audit: Arc<dyn AuditLog>,
    events: Arc<dyn EventEmitter>,
    webhook_shared_secret: Vec<u8>,
    /// §4.4: payments stuck `PENDING` past this are swept to `FAILED`,
    /// independent of the slot's own expiry. Sourced from
    /// `AppConfig::payment_timeout_minutes`.
    payment_timeout: Duration,
}

impl PaymentConfirmer {
    pub fn new(
        cache: Arc<dyn AtomicCache>,
        slots: Arc<dyn SlotRepository>,
        purchases: Arc<dyn PurchaseRepository>,
        audit: Arc<dyn AuditLog>,
        events: Arc<dyn EventEmitter>,
        webhook_shared_secret: Vec<u8>,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            slots,
            purchases,
            audit,
            events,
            webhook_shared_secret,
            payment_timeout,
        }
    }

    pub fn verify_signature(&self, body: &[u8], signature_hex: &str) -> bool {
        signature::verify(&self.webhook_shared_secret, body, signature_hex)
    }

    /// §4.4 step 1: a rejected signature must still be audit-logged. No
    /// durable state changes, so `old_status`/`new_status` are both
    /// `Active` as a marker rather than a real transition; `slot_id` is a
    /// best-effort parse of the unverified body, since a forged callback
    /// may not name a real slot at all.
    pub async fn audit_invalid_signature(&self, body: &[u8], trace_id: &crate::core_types::TraceId) {
        let slot_id = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("slot_id").and_then(|s| s.as_str().map(str::to_string)))
            .and_then(|s| s.parse::<SlotId>().ok())
            .unwrap_or_else(SlotId::new);

        let entry = AuditEntry::new(
            slot_id,
            Some(SlotStatus::Active),
            SlotStatus::Active,
            Utc::now(),
            trace_id.clone(),
            json!({ "kind": "invalid_signature" }),
        );
        if let Err(e) = self.audit.record(&entry).await {
            tracing::error!(error = %e, "failed to audit invalid signature callback");
        }
    }

    pub async fn confirm(
        &self,
        callback: PaymentCallback,
        ctx: &TraceContext,
    ) -> Result<ConfirmResult, EngineError> {
        let claim_meta = PaymentClaimMeta {
            payment_reference: callback.payment_reference.clone(),
            status: match callback.outcome {
                CallbackOutcome::Success => PaymentStatus::Success.as_str().to_string(),
                CallbackOutcome::Failed => PaymentStatus::Failed.as_str().to_string(),
            },
        };

        match self.cache.claim_payment(&callback.idempotency_key, &claim_meta).await? {
            ClaimOutcome::FirstClaim => {}
            ClaimOutcome::AlreadyClaimed(existing) if existing == claim_meta => {
                return Ok(ConfirmResult::Replayed);
            }
            ClaimOutcome::AlreadyClaimed(_) => return Err(EngineError::IdempotencyConflict),
        }

        let slot = self
            .slots
            .get(callback.slot_id)
            .await?
            .ok_or(EngineError::SlotNotAdmissible(callback.slot_id))?;

        if slot.status == SlotStatus::Expired {
            // Out of scope: the refund workflow runs asynchronously.
            return Ok(ConfirmResult::LatePayment);
        }
        if slot.status != SlotStatus::Active {
            return Err(EngineError::SlotNotAdmissible(callback.slot_id));
        }

        let now = Utc::now();

        // Written PENDING before the outcome is durable, so a crash between
        // here and the final transition still leaves sweep_timeouts() a row
        // to find instead of no trace of the attempt at all.
        let pending = Purchase::pending(
            slot.slot_id,
            slot.user_id.clone(),
            slot.product_id,
            callback.amount,
            callback.payment_reference.clone(),
            callback.idempotency_key.clone(),
            callback.gateway_event_id.clone(),
        );
        self.purchases.insert(&pending).await?;

        match callback.outcome {
            CallbackOutcome::Success => {
                let transitioned = self
                    .slots
                    .transition(slot.slot_id, SlotStatus::Active, SlotStatus::Completed, None)
                    .await?;
                if !transitioned {
                    return Err(EngineError::SlotNotAdmissible(callback.slot_id));
                }

                self.purchases
                    .transition_payment_status(
                        &callback.idempotency_key,
                        PaymentStatus::Pending,
                        PaymentStatus::Success,
                        None,
                        Some(now),
                    )
                    .await?;

                self.audit
                    .record(&AuditEntry::new(
                        slot.slot_id,
                        Some(SlotStatus::Active),
                        SlotStatus::Completed,
                        now,
                        ctx.trace_id().clone(),
                        json!({ "purchase_id": pending.purchase_id.to_string() }),
                    ))
                    .await?;

                self.events
                    .emit(
                        DomainEvent::PaymentCompleted {
                            purchase_id: pending.purchase_id,
                            slot_id: slot.slot_id,
                            product_id: slot.product_id,
                            user_id: slot.user_id.clone(),
                        },
                        ctx.trace_id(),
                    )
                    .await;

                Ok(ConfirmResult::Completed)
            }
            CallbackOutcome::Failed => {
                let failure_reason = "PAYMENT_GATEWAY_DECLINED".to_string();
                self.purchases
                    .transition_payment_status(
                        &callback.idempotency_key,
                        PaymentStatus::Pending,
                        PaymentStatus::Failed,
                        Some(&failure_reason),
                        None,
                    )
                    .await?;

                self.events
                    .emit(
                        DomainEvent::PaymentFailed {
                            purchase_id: pending.purchase_id,
                            slot_id: slot.slot_id,
                            product_id: slot.product_id,
                            user_id: slot.user_id.clone(),
                            failure_reason,
                        },
                        ctx.trace_id(),
                    )
                    .await;

                Ok(ConfirmResult::Failed)
            }
        }
    }

    /// Sweeps `PENDING` purchases past `PAYMENT_TIMEOUT` to `FAILED`,
    /// independent of slot expiry.
    pub async fn sweep_timeouts(&self) -> Result<usize, EngineError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.payment_timeout).unwrap();
        let stale = self.purchases.find_stale_pending(cutoff, 500).await?;
        let mut swept = 0;

        for purchase in stale {
            let updated = self
                .purchases
                .transition_payment_status(
                    &purchase.idempotency_key,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                    Some("PAYMENT_TIMEOUT"),
                    None,
                )
                .await?;
            if updated {
                swept += 1;
            }
        }

        Ok(swept)
    }
}
