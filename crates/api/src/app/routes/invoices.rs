use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use feeledger_billing::{InvoiceId, InvoicePatch};
use feeledger_infra::projections::InvoiceFilter;
use feeledger_infra::services::GenerateInvoices;

use crate::app::{dto, errors};
use crate::app::routes::payments;
use crate::app::services::AppServices;
use crate::context::{billing_context, ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices))
        .route("/generate", post(generate_invoices))
        .route("/:id", get(get_invoice).patch(update_invoice))
        .route("/:id/cancel", post(cancel_invoice))
        .route("/:id/finalize", post(finalize_invoice))
        .route(
            "/:id/payments",
            post(payments::record_payment).get(payments::list_payments),
        )
        .route("/:id/payments/:payment_id/void", post(payments::void_payment))
}

pub async fn generate_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::GenerateInvoicesRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let ctx = billing_context(tenant, actor);
    let request = GenerateInvoices::from(body);

    match services
        .run(move |engine| engine.generate_invoices(&ctx, &request))
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    query: Result<Query<dto::InvoiceListQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::query_rejection(e),
    };
    let ctx = billing_context(tenant, actor);
    let filter = InvoiceFilter::from(query);

    match services
        .run(move |engine| Ok(engine.list_invoices(&ctx, &filter)))
        .await
    {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match errors::parse_id(&id, "invoice id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.get_invoice(&ctx, invoice_id))
        .await
    {
        Ok(rm) => (StatusCode::OK, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Result<Json<InvoicePatch>, JsonRejection>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match errors::parse_id(&id, "invoice id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(patch) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.update_invoice(&ctx, invoice_id, patch))
        .await
    {
        Ok(rm) => (StatusCode::OK, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn cancel_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelInvoiceRequest>>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match errors::parse_id(&id, "invoice id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.cancel_invoice(&ctx, invoice_id, reason))
        .await
    {
        Ok(rm) => (StatusCode::OK, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn finalize_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match errors::parse_id(&id, "invoice id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.finalize_invoice(&ctx, invoice_id))
        .await
    {
        Ok(rm) => (StatusCode::OK, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}
