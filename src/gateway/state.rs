//! Gateway application state (shared across handlers via `Arc<AppState>`).

use std::sync::Arc;

use sqlx::PgPool;

use crate::admission::AdmissionService;
use crate::payment::PaymentConfirmer;

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionService>,
    pub payments: Arc<PaymentConfirmer>,
    /// Used only by the health check; every other handler goes through the
    /// repository/cache ports.
    pub db_pool: PgPool,
}

impl AppState {
    pub fn new(admission: Arc<AdmissionService>, payments: Arc<PaymentConfirmer>, db_pool: PgPool) -> Self {
        Self {
            admission,
            payments,
            db_pool,
        }
    }
}
