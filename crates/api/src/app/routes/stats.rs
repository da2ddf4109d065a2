use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use feeledger_infra::services::DateRange;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{billing_context, ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/invoices", get(invoice_stats))
        .route("/payments", get(payment_stats))
}

pub async fn invoice_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
) -> axum::response::Response {
    let ctx = billing_context(tenant, actor);
    match services.run(move |engine| engine.invoice_stats(&ctx)).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(resp) => resp,
    }
}

/// `?from=YYYY-MM-DD&to=YYYY-MM-DD`, both optional and inclusive.
pub async fn payment_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    query: Result<Query<DateRange>, QueryRejection>,
) -> axum::response::Response {
    let Query(range) = match query {
        Ok(q) => q,
        Err(e) => return errors::query_rejection(e),
    };
    let ctx = billing_context(tenant, actor);
    match services
        .run(move |engine| engine.payment_stats(&ctx, Some(range)))
        .await
    {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(resp) => resp,
    }
}
