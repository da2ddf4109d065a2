use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use feeledger_billing::{FeeStructureId, FeeStructurePatch};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::{billing_context, ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(define_structure).get(list_structures))
        .route(
            "/:id",
            get(get_structure).patch(update_structure).delete(delete_structure),
        )
}

pub async fn define_structure(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::DefineStructureRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.define_structure(&ctx, body.into()))
        .await
    {
        Ok(rm) => (StatusCode::CREATED, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_structures(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    query: Result<Query<dto::StructureListQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(e) => return errors::query_rejection(e),
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| Ok(engine.list_structures(&ctx, query.academic_year.as_ref())))
        .await
    {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_structure(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let structure_id: FeeStructureId = match errors::parse_id(&id, "fee structure id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.get_structure(&ctx, structure_id))
        .await
    {
        Ok(rm) => (StatusCode::OK, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn update_structure(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Result<Json<FeeStructurePatch>, JsonRejection>,
) -> axum::response::Response {
    let structure_id: FeeStructureId = match errors::parse_id(&id, "fee structure id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(patch) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.update_structure(&ctx, structure_id, patch))
        .await
    {
        Ok(rm) => (StatusCode::OK, Json(rm)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn delete_structure(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let structure_id: FeeStructureId = match errors::parse_id(&id, "fee structure id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ctx = billing_context(tenant, actor);

    match services
        .run(move |engine| engine.delete_structure(&ctx, structure_id))
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(resp) => resp,
    }
}
