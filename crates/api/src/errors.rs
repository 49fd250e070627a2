//! Uniform JSON error responses.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

pub fn json_error(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        Json(json!({
            "error": { "code": code, "message": message.into() },
        })),
    )
        .into_response()
}
