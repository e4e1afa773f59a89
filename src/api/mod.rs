pub mod complete;
pub(crate) mod forward;
pub mod health;
pub mod messages;
pub mod models;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

enum RouteMatch {
    Messages,
    Complete,
    Models,
    Health,
    Metrics,
    Preflight,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler, applying CORS,
/// request-size limiting, metrics, and request logging.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    state.metrics.connection_opened();
    let started = Instant::now();

    let (parts, request_body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let route = match_route(&parts.method, &path);

    let mut response = match route {
        RouteMatch::Preflight => StatusCode::NO_CONTENT.into_response(),
        RouteMatch::Health => health::handler(),
        RouteMatch::Metrics => metrics_response(&state),
        RouteMatch::Models => models::handler(&state, &parts.headers).await,
        RouteMatch::Messages => {
            match read_request_body(request_body, state.config.max_request_size).await {
                Ok(bytes) => messages::handler(&state, &parts.headers, bytes).await,
                Err(response) => response,
            }
        }
        RouteMatch::Complete => {
            match read_request_body(request_body, state.config.max_request_size).await {
                Ok(bytes) => complete::handler(&state, &parts.headers, bytes).await,
                Err(response) => response,
            }
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    apply_cors_headers(&parts.headers, response.headers_mut());

    let latency_ms = started.elapsed().as_millis() as u64;
    let status = response.status();
    state
        .metrics
        .record_request(latency_ms, status.is_client_error() || status.is_server_error());
    state.metrics.connection_closed();
    tracing::info!(
        method = %parts.method,
        path = %path,
        status = status.as_u16(),
        latency_ms,
        "request"
    );

    Ok(response)
}

fn match_route(method: &Method, path: &str) -> RouteMatch {
    if method == Method::OPTIONS {
        return RouteMatch::Preflight;
    }

    match path {
        "/v1/messages" => {
            if method == Method::POST {
                RouteMatch::Messages
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/v1/complete" => {
            if method == Method::POST {
                RouteMatch::Complete
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/v1/models" => {
            if method == Method::GET {
                RouteMatch::Models
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/health" => {
            if method == Method::GET {
                RouteMatch::Health
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/metrics" => {
            if method == Method::GET {
                RouteMatch::Metrics
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        _ => RouteMatch::NotFound,
    }
}

async fn read_request_body(request_body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(request_body, limit).await.map_err(|_| {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "request body too large",
        )
            .into_response()
    })
}

fn metrics_response(state: &AppState) -> Response {
    (
        [(
            http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        state.metrics.render_prometheus(),
    )
        .into_response()
}

fn apply_cors_headers(request_headers: &http::HeaderMap, headers: &mut http::HeaderMap) {
    match request_headers.get(http::header::ORIGIN) {
        Some(origin) => {
            headers.insert(
                http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
                origin.clone(),
            );
            headers.insert(
                http::header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                http::HeaderValue::from_static("true"),
            );
            headers.insert(
                http::header::VARY,
                http::HeaderValue::from_static("Origin"),
            );
        }
        None => {
            headers.insert(
                http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
                http::HeaderValue::from_static("*"),
            );
        }
    }
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_METHODS,
        http::HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        http::HeaderValue::from_static(
            "Content-Type, Authorization, x-api-key, anthropic-version",
        ),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_MAX_AGE,
        http::HeaderValue::from_static("86400"),
    );
}
