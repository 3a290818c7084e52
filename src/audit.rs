//! Append-only audit trail for slot state transitions. One row per
//! transition, written in the same call as the durable CAS update so the
//! trail and the state machine never drift — grounded on the adapter
//! operation recording in `internal_transfer::db::record_operation`, which
//! writes its own append-only row alongside the state change it logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{PgPool, Row};
use std::sync::Mutex;

use crate::core_types::{SlotId, TraceId};
use crate::errors::EngineError;
use crate::slot::SlotStatus;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub slot_id: SlotId,
    pub old_status: Option<SlotStatus>,
    pub new_status: SlotStatus,
    pub occurred_at: DateTime<Utc>,
    pub trace_id: TraceId,
    pub metadata: Json,
}

impl AuditEntry {
    pub fn new(
        slot_id: SlotId,
        old_status: Option<SlotStatus>,
        new_status: SlotStatus,
        occurred_at: DateTime<Utc>,
        trace_id: TraceId,
        metadata: Json,
    ) -> Self {
        Self {
            slot_id,
            old_status,
            new_status,
            occurred_at,
            trace_id,
            metadata,
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), EngineError>;

    async fn history(&self, slot_id: SlotId) -> Result<Vec<AuditEntry>, EngineError>;
}

pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<AuditEntry, EngineError> {
        let slot_id: uuid::Uuid = row.get("slot_id");
        let old_status: Option<String> = row.get("old_status");
        let new_status_str: String = row.get("new_status");
        let new_status = SlotStatus::from_str_opt(&new_status_str)
            .ok_or_else(|| EngineError::Fatal(format!("invalid audit status: {new_status_str}")))?;

        Ok(AuditEntry {
            slot_id: SlotId(slot_id),
            old_status: old_status.and_then(|s| SlotStatus::from_str_opt(&s)),
            new_status,
            occurred_at: row.get("occurred_at"),
            trace_id: TraceId(row.get("trace_id")),
            metadata: row.get("metadata"),
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO slot_audit_log (slot_id, old_status, new_status, occurred_at, trace_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.slot_id.inner())
        .bind(entry.old_status.map(|s| s.as_str()))
        .bind(entry.new_status.as_str())
        .bind(entry.occurred_at)
        .bind(&entry.trace_id.0)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self, slot_id: SlotId) -> Result<Vec<AuditEntry>, EngineError> {
        let rows = sqlx::query(
            "SELECT * FROM slot_audit_log WHERE slot_id = $1 ORDER BY occurred_at ASC",
        )
        .bind(slot_id.inner())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}

#[derive(Default)]
pub struct FakeAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl FakeAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for FakeAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), EngineError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn history(&self, slot_id: SlotId) -> Result<Vec<AuditEntry>, EngineError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.slot_id == slot_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn history_returns_only_entries_for_requested_slot() {
        let log = FakeAuditLog::new();
        let slot_a = SlotId::new();
        let slot_b = SlotId::new();

        log.record(&AuditEntry::new(
            slot_a,
            None,
            SlotStatus::Active,
            Utc::now(),
            TraceId::new(),
            json!({}),
        ))
        .await
        .unwrap();
        log.record(&AuditEntry::new(
            slot_b,
            None,
            SlotStatus::Active,
            Utc::now(),
            TraceId::new(),
            json!({}),
        ))
        .await
        .unwrap();
        log.record(&AuditEntry::new(
            slot_a,
            Some(SlotStatus::Active),
            SlotStatus::Completed,
            Utc::now(),
            TraceId::new(),
            json!({"payment_reference": "ref-1"}),
        ))
        .await
        .unwrap();

        let history = log.history(slot_a).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].new_status, SlotStatus::Completed);
    }
}
