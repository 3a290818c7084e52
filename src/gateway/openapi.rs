//! OpenAPI / Swagger UI documentation.
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::handlers::admission::{AcquireSlotRequest, AcquireSlotResponse};
use crate::gateway::handlers::health::HealthResponse;
use crate::gateway::handlers::payment::{PaymentCallbackBody, PaymentCallbackResponse};
use crate::gateway::problem::ProblemDetail;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Slot Engine API",
        version = "1.0.0",
        description = "Bounded-inventory purchase admission with single-flight fairness guarantees.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::admission::acquire_slot,
        crate::gateway::handlers::payment::payment_callback,
        crate::gateway::handlers::health::healthz,
    ),
    components(
        schemas(
            AcquireSlotRequest,
            AcquireSlotResponse,
            PaymentCallbackBody,
            PaymentCallbackResponse,
            HealthResponse,
            ProblemDetail,
        )
    ),
    tags(
        (name = "Admission", description = "Slot acquisition"),
        (name = "Payments", description = "Payment gateway webhook"),
        (name = "System", description = "Health checks")
    )
)]
pub struct ApiDoc;
