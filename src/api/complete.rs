use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::HeaderMap;

use crate::error::ProxyError;
use crate::protocol::anthropic::CompleteRequest;
use crate::protocol::translate::build_complete_chat_request;
use crate::state::AppState;

use super::forward::forward_chat;
use super::messages::admit_client;

/// `POST /v1/complete`: legacy text completion surface, mapped to a
/// single-user-message chat request.
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

    let request: CompleteRequest = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let target_model = request
        .model
        .clone()
        .or_else(|| state.config.default_model.clone())
        .unwrap_or_default();

    let (upstream_base, route_key) = state.resolve_upstream(&target_model);
    let auth = state.outbound_auth(route_key, &token);
    let chat = build_complete_chat_request(&request, &target_model);

    forward_chat(state, &upstream_base, &auth, &chat).await
}
