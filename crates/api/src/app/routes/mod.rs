use axum::{routing::post, Router};

pub mod cohorts;
pub mod fee_structures;
pub mod invoices;
pub mod payments;
pub mod stats;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/fee-structures", fee_structures::router())
        .route("/cohorts/:cohort/accounts", post(cohorts::upsert_accounts))
        .nest("/invoices", invoices::router())
        .nest("/stats", stats::router())
}
