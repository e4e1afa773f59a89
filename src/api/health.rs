use axum::response::{IntoResponse, Response};
use serde_json::json;

pub const SERVICE_NAME: &str = "antrelay";

/// `GET /health`
pub fn handler() -> Response {
    axum::Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}
