use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use feeledger_infra::BillingError;

pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "validation_error" | "invariant_violation" => StatusCode::UNPROCESSABLE_ENTITY,
        "bad_request" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "conflict" => StatusCode::CONFLICT,
        "unauthorized" => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn billing_error_to_response(err: BillingError) -> axum::response::Response {
    let kind = err.kind();
    let status = status_for_kind(kind);
    if status.is_server_error() {
        error!(error = %err, "billing operation failed");
    }
    json_error(status, kind, err.message())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.body_text())
        }
        other => json_error(StatusCode::BAD_REQUEST, "bad_request", other.body_text()),
    }
}

pub fn query_rejection(rejection: QueryRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "bad_request", rejection.body_text())
}

pub fn parse_id<T: std::str::FromStr>(
    raw: &str,
    what: &'static str,
) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_http_statuses() {
        assert_eq!(status_for_kind("validation_error"), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for_kind("bad_request"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_kind("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_kind("conflict"), StatusCode::CONFLICT);
        assert_eq!(status_for_kind("internal_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
