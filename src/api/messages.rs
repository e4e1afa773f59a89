use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::HeaderMap;

use crate::auth::{extract_client_token, AdmitDecision};
use crate::error::ProxyError;
use crate::observability::mask_credential;
use crate::protocol::anthropic::MessagesRequest;
use crate::protocol::translate::build_chat_request;
use crate::state::AppState;

use super::forward::forward_chat;

/// `POST /v1/messages`
pub async fn handler(state: &Arc<AppState>, headers: &HeaderMap, body: Bytes) -> Response {
    match handler_inner(state, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            if err.is_upstream_error() {
                state.metrics.record_upstream_error();
            }
            err.into_response()
        }
    }
}

async fn handler_inner(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let token = admit_client(state, headers)?;

    let request: MessagesRequest = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let target_model = request
        .model
        .clone()
        .or_else(|| state.config.default_model.clone())
        .unwrap_or_default();

    let (upstream_base, route_key) = state.resolve_upstream(&target_model);
    let auth = state.outbound_auth(route_key, &token);
    let chat = build_chat_request(&request, &target_model);

    tracing::debug!(
        model = %target_model,
        upstream = %upstream_base,
        stream = chat.stream,
        messages = chat.messages.len(),
        "forwarding messages request"
    );

    forward_chat(state, &upstream_base, &auth, &chat).await
}

/// Validate the client credential shared by the inbound endpoints.
///
/// # Errors
///
/// Returns [`ProxyError::Unauthorized`] for missing, unknown, or
/// inactive credentials and [`ProxyError::RateLimited`] when the
/// per-credential bucket is empty.
pub(crate) fn admit_client(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<String, ProxyError> {
    let token = extract_client_token(headers)
        .ok_or_else(|| ProxyError::Unauthorized("missing credential".to_string()))?
        .to_string();

    match state.credentials.admit(&token) {
        AdmitDecision::Allowed => Ok(token),
        AdmitDecision::RateLimited => {
            state.metrics.record_rate_limited();
            tracing::warn!(key = %mask_credential(&token), "credential rate limited");
            Err(ProxyError::RateLimited)
        }
        AdmitDecision::UnknownKey | AdmitDecision::Inactive => {
            tracing::warn!(key = %mask_credential(&token), "credential rejected");
            Err(ProxyError::Unauthorized("invalid credential".to_string()))
        }
    }
}
