use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::TenantContext;

/// Seed the in-memory cohort directory (dev wiring; rosters are owned upstream).
pub async fn upsert_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(cohort): Path<String>,
    body: Result<Json<dto::UpsertAccountsRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let count = body.accounts.len();

    if let Err(e) = services
        .directory()
        .upsert_accounts(tenant.tenant_id(), &cohort, body.accounts)
    {
        return errors::billing_error_to_response(e.into());
    }
    info!(tenant_id = %tenant.tenant_id(), cohort = %cohort, count, "cohort accounts upserted");

    (
        StatusCode::OK,
        Json(serde_json::json!({ "cohort": cohort, "upserted": count })),
    )
        .into_response()
}
