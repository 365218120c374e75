use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::Value;

use relay_protocol::ProblemDetails;

pub(crate) fn json_ok(body: Value) -> axum::response::Response {
    (StatusCode::OK, Json(body)).into_response()
}

pub(crate) fn problem(status: StatusCode, title: &str, detail: impl Into<String>) -> axum::response::Response {
    let body = ProblemDetails::new(status.as_u16(), title).with_detail(detail);
    (status, Json(body)).into_response()
}
