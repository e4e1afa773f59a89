use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use http::HeaderMap;

use crate::error::ProxyError;
use crate::protocol::anthropic::{ModelInfo, ModelsResponse};
use crate::protocol::openai::{models_url, ModelsResponse as UpstreamModels};
use crate::state::AppState;

use super::messages::admit_client;

/// Fixed creation timestamp for wrapped upstream models; the upstream
/// listing carries none in a compatible shape.
const MODEL_CREATED_AT: &str = "2024-01-01T00:00:00Z";

/// `GET /v1/models`: proxy the upstream listing, rewrapped in the
/// Anthropic shape.
pub async fn handler(state: &Arc<AppState>, headers: &HeaderMap) -> Response {
    match handler_inner(state, headers).await {
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
) -> Result<Response, ProxyError> {
    let token = admit_client(state, headers)?;
    let auth = state.outbound_auth(None, &token);
    let url = models_url(&state.config.upstream_base);

    let response = state
        .transport
        .client()
        .get(&url)
        .header(http::header::AUTHORIZATION, auth)
        .send()
        .await
        .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;

    // A listing that fails to decode degrades to an empty catalog
    // instead of failing the request.
    let upstream: UpstreamModels = match response.json().await {
        Ok(models) => models,
        Err(err) => {
            tracing::debug!(error = %err, "upstream models decode error");
            UpstreamModels::default()
        }
    };

    let wrapped = ModelsResponse {
        data: upstream
            .data
            .into_iter()
            .map(|model| ModelInfo {
                type_: "model".to_string(),
                display_name: model.id.clone(),
                id: model.id,
                created_at: MODEL_CREATED_AT.to_string(),
            })
            .collect(),
        has_more: false,
    };

    Ok(axum::Json(wrapped).into_response())
}
