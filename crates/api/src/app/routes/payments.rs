use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use feeledger_billing::{InvoiceId, PaymentId};
use feeledger_infra::services::RecordPaymentRequest;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::{billing_context, ActorContext, TenantContext};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Record a payment. The idempotency key may come from the body or the
/// `Idempotency-Key` header; the body wins when both are set.
pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<dto::RecordPaymentBody>, JsonRejection>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match errors::parse_id(&id, "invoice id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let header_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = RecordPaymentRequest {
        invoice_id,
        amount: body.amount,
        method: body.method,
        payment_date: body.payment_date,
        details: body.details,
        idempotency_key: body.idempotency_key.or(header_key),
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.record_payment(&ctx, request))
        .await
    {
        Ok(payment) => (StatusCode::CREATED, Json(payment)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_payments(
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
        .run(move |engine| engine.list_payments(&ctx, invoice_id))
        .await
    {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn void_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path((id, payment_id)): Path<(String, String)>,
    body: Result<Json<dto::VoidPaymentRequest>, JsonRejection>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match errors::parse_id(&id, "invoice id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let payment_id: PaymentId = match errors::parse_id(&payment_id, "payment id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.void_payment(&ctx, invoice_id, payment_id, body.reason))
        .await
    {
        Ok(rm) => (StatusCode::OK, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}
