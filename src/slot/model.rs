//! The `PurchaseSlot` state machine. Status IDs follow the matching engine's
//! `TransferState` idiom (explicit enum, terminal/in-flight predicates,
//! string round-trip for PostgreSQL storage) but the DAG here is simpler:
//! `ACTIVE -> {EXPIRED, COMPLETED}`, both one-way, both terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{ProductId, SlotId, TraceId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStatus {
    Active,
    Expired,
    Completed,
}

impl SlotStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotStatus::Expired | SlotStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Active => "ACTIVE",
            SlotStatus::Expired => "EXPIRED",
            SlotStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(SlotStatus::Active),
            "EXPIRED" => Some(SlotStatus::Expired),
            "COMPLETED" => Some(SlotStatus::Completed),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition in the DAG
    /// `ACTIVE -> {EXPIRED, COMPLETED}`.
    pub fn can_transition_to(&self, next: SlotStatus) -> bool {
        matches!(
            (self, next),
            (SlotStatus::Active, SlotStatus::Expired) | (SlotStatus::Active, SlotStatus::Completed)
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimKind {
    Auto,
    Manual,
}

impl ReclaimKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimKind::Auto => "AUTO",
            ReclaimKind::Manual => "MANUAL",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "AUTO" => Some(ReclaimKind::Auto),
            "MANUAL" => Some(ReclaimKind::Manual),
            _ => None,
        }
    }
}

/// A bounded-inventory admission held by one user for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseSlot {
    pub slot_id: SlotId,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub status: SlotStatus,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reclaim_kind: Option<ReclaimKind>,
    /// Captured from the cache's `ZRANK` at admission time; best-effort,
    /// since the cache's ordering guarantee is point-in-time only.
    pub position_hint: Option<i64>,
    pub trace_id: TraceId,
    /// Set once `ReleaseOne` has been confirmed for this slot's expiry.
    /// Meaningless while `status == Active`; the reconciliation pass polls
    /// `EXPIRED` rows where this is still `false` (§4.3).
    pub cache_released: bool,
}

impl PurchaseSlot {
    pub fn new(
        product_id: ProductId,
        user_id: UserId,
        acquired_at: DateTime<Utc>,
        ttl_minutes: i64,
        position_hint: Option<i64>,
        trace_id: TraceId,
    ) -> Self {
        Self {
            slot_id: SlotId::new(),
            product_id,
            user_id,
            status: SlotStatus::Active,
            acquired_at,
            expires_at: acquired_at + chrono::Duration::minutes(ttl_minutes),
            reclaim_kind: None,
            position_hint,
            trace_id,
            cache_released: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SlotStatus::Active && self.expires_at <= now
    }
}
