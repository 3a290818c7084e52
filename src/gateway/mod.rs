pub mod handlers;
pub mod openapi;
pub mod problem;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

/// Builds the axum router. Split out from [`run_server`] so integration
/// tests can exercise it with `tower::ServiceExt::oneshot` against an
/// in-memory state without binding a socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/slots/acquire", post(handlers::acquire_slot))
        .route("/payments/callback", post(handlers::payment_callback))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Starts the HTTP gateway on `port`, serving until the process is killed.
pub async fn run_server(port: u16, state: Arc<AppState>) {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind to {addr}: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "gateway listening");
    tracing::info!(%addr, "api docs at /docs");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("FATAL: server error: {e}");
        std::process::exit(1);
    }
}
