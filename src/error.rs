use axum::response::{IntoResponse, Response};
use bytes::Bytes;

/// Canonical error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("client disconnected: {0}")]
    ClientCanceled(String),
    #[error("upstream request error: {0}")]
    UpstreamTransport(String),
    /// Non-200 terminal upstream response, forwarded verbatim.
    #[error("upstream returned status {status}")]
    UpstreamStatus {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    #[error("upstream decode error: {0}")]
    UpstreamDecode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Nonstandard status used when the client goes away while we wait.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

impl ProxyError {
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            ProxyError::BadRequest(_) => http::StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized(_) => http::StatusCode::UNAUTHORIZED,
            ProxyError::RateLimited => http::StatusCode::TOO_MANY_REQUESTS,
            ProxyError::ClientCanceled(_) => http::StatusCode::from_u16(
                STATUS_CLIENT_CLOSED_REQUEST,
            )
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
            ProxyError::UpstreamTransport(_) | ProxyError::UpstreamDecode(_) => {
                http::StatusCode::BAD_GATEWAY
            }
            ProxyError::UpstreamStatus { status, .. } => http::StatusCode::from_u16(*status)
                .unwrap_or(http::StatusCode::BAD_GATEWAY),
            ProxyError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn anthropic_error_type(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "invalid_request_error",
            ProxyError::Unauthorized(_) => "authentication_error",
            ProxyError::RateLimited => "rate_limit_error",
            ProxyError::ClientCanceled(_)
            | ProxyError::UpstreamTransport(_)
            | ProxyError::UpstreamStatus { .. }
            | ProxyError::UpstreamDecode(_)
            | ProxyError::Internal(_) => "api_error",
        }
    }

    /// Whether this outcome should be counted as an upstream failure.
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamTransport(_)
                | ProxyError::UpstreamStatus { .. }
                | ProxyError::UpstreamDecode(_)
        )
    }
}

/// Build an Anthropic-shaped error body for `err`.
#[must_use]
pub fn anthropic_error_body(err: &ProxyError) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": err.anthropic_error_type(),
            "message": err.to_string(),
        }
    })
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        // Terminal upstream responses keep the upstream body and content type.
        if let ProxyError::UpstreamStatus {
            status,
            content_type,
            body,
        } = self
        {
            let status = http::StatusCode::from_u16(status)
                .unwrap_or(http::StatusCode::BAD_GATEWAY);
            let mut response = Response::new(axum::body::Body::from(body));
            *response.status_mut() = status;
            let ctype = content_type
                .as_deref()
                .and_then(|v| http::HeaderValue::from_str(v).ok())
                .unwrap_or_else(|| http::HeaderValue::from_static("application/json"));
            response
                .headers_mut()
                .insert(http::header::CONTENT_TYPE, ctype);
            return response;
        }

        let status = self.status_code();
        let body = anthropic_error_body(&self);
        (status, axum::Json(body)).into_response()
    }
}
