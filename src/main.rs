//! Slot Engine service entry point: loads configuration, connects to
//! Postgres/Redis/Kafka, wires the domain services, and serves the HTTP
//! gateway alongside the reclaim loop and payment sweeper background tasks.

use std::sync::Arc;
use std::time::Duration;

use slotengine::admission::AdmissionService;
use slotengine::audit::{AuditLog, PostgresAuditLog};
use slotengine::cache::{AtomicCache, RedisAtomicCache};
use slotengine::config::AppConfig;
use slotengine::db::Database;
use slotengine::events::{EventEmitter, KafkaEventEmitter};
use slotengine::gateway::state::AppState;
use slotengine::logging::init_logging;
use slotengine::payment::PaymentConfirmer;
use slotengine::product::{PgProductGateway, ProductGateway};
use slotengine::purchase::{PgPurchaseRepository, PurchaseRepository};
use slotengine::reclaim::ReclaimLoop;
use slotengine::slot::{PgSlotRepository, SlotRepository};

#[tokio::main]
async fn main() {
    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("FATAL: failed to load configuration: {e}");
        std::process::exit(1);
    });

    let _log_guard = init_logging(&config);
    tracing::info!("slot engine starting up");

    let db = Database::connect(&config.database_url, &config.store_pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to connect to postgres");
            std::process::exit(1);
        });

    if let Err(e) = db.run_migrations().await {
        tracing::error!(error = %e, "failed to run migrations");
        std::process::exit(1);
    }

    let cache: Arc<dyn AtomicCache> = Arc::new(
        RedisAtomicCache::connect(&config.redis_url)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to connect to redis");
                std::process::exit(1);
            }),
    );

    let products: Arc<dyn ProductGateway> = Arc::new(PgProductGateway::new(db.pool().clone()));
    let slots: Arc<dyn SlotRepository> = Arc::new(PgSlotRepository::new(db.pool().clone()));
    let purchases: Arc<dyn PurchaseRepository> = Arc::new(PgPurchaseRepository::new(db.pool().clone()));
    let audit: Arc<dyn AuditLog> = Arc::new(PostgresAuditLog::new(db.pool().clone()));

    let events: Arc<dyn EventEmitter> =
        Arc::new(
            KafkaEventEmitter::new(&config.kafka_brokers, &config.kafka_schema_registry_url).unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to construct kafka event emitter");
                std::process::exit(1);
            }),
        );

    let admission = Arc::new(AdmissionService::new(
        products.clone(),
        cache.clone(),
        slots.clone(),
        audit.clone(),
        events.clone(),
        config.slot_ttl_minutes,
        Duration::from_millis(config.admission_deadline_millis),
    ));

    let payments = Arc::new(PaymentConfirmer::new(
        cache.clone(),
        slots.clone(),
        purchases.clone(),
        audit.clone(),
        events.clone(),
        config.webhook_shared_secret.as_bytes().to_vec(),
        Duration::from_secs(config.payment_timeout_minutes.max(0) as u64 * 60),
    ));

    let reclaim = Arc::new(ReclaimLoop::new(
        slots.clone(),
        cache.clone(),
        audit.clone(),
        events.clone(),
        Duration::from_secs(config.reclaim_interval_seconds),
        config.reclaim_batch,
    ));
    tokio::spawn({
        let reclaim = reclaim.clone();
        async move { reclaim.run().await }
    });

    tokio::spawn({
        let reclaim = reclaim.clone();
        // Slower than the fast tick loop on purpose (§4.3): it only ever
        // catches what that loop already missed.
        let reconcile_interval = Duration::from_secs(config.reclaim_interval_seconds * 6);
        let reconcile_batch = config.reclaim_batch;
        async move { reclaim.run_reconcile(reconcile_interval, reconcile_batch).await }
    });

    tokio::spawn({
        let payments = payments.clone();
        let sweep_interval = Duration::from_secs(config.reclaim_interval_seconds);
        async move {
            let mut tick = tokio::time::interval(sweep_interval);
            loop {
                tick.tick().await;
                match payments.sweep_timeouts().await {
                    Ok(swept) if swept > 0 => tracing::info!(swept, "swept timed-out payments"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "payment sweep failed"),
                }
            }
        }
    });

    let state = Arc::new(AppState::new(admission, payments, db.pool().clone()));
    slotengine::gateway::run_server(config.http_port, state).await;
}
