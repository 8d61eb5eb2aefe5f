use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use kotoba_core::DomainError;
use kotoba_infra::jobs::DispatchError;
use kotoba_infra::services::ServiceError;
use kotoba_infra::store::StoreError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "invalid", msg),
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn service_error_to_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Domain(DomainError::NotFound) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }
        ServiceError::Domain(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        ServiceError::NotFound { what, id } => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found: {id}"))
        }
        ServiceError::Store(e) => store_error_to_response(e),
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::JobNotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job not found: {id}"))
        }
        e @ DispatchError::NotPending { .. } => {
            json_error(StatusCode::CONFLICT, "not_pending", e.to_string())
        }
        DispatchError::Store(e) => store_error_to_response(e),
    }
}
