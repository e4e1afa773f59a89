use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use smallvec::SmallVec;

use crate::error::ProxyError;
use crate::protocol::assemble::assemble_message;
use crate::protocol::openai::{chat_completions_url, ChatRequest, ChatResponse};
use crate::state::AppState;
use crate::stream::fsm::StreamTranslator;
use crate::stream::sse_line_stream;

/// Forward a translated chat request upstream and build the client
/// response, streaming or not.
///
/// Admission through the global limiter happens first; the outbound
/// body is marshaled once and reused across retry attempts. Dropping
/// the returned future (client disconnect) aborts the upstream call.
///
/// # Errors
///
/// Surfaces the error kinds of [`ProxyError`]; non-200 terminal
/// upstream responses come back as [`ProxyError::UpstreamStatus`] with
/// the upstream body preserved.
pub(crate) async fn forward_chat(
    state: &Arc<AppState>,
    upstream_base: &str,
    auth: &str,
    chat: &ChatRequest,
) -> Result<Response, ProxyError> {
    if let Some(limiter) = state.global_limiter.as_ref() {
        limiter.acquire().await;
    }

    let url = chat_completions_url(upstream_base);
    let body = state.transport.marshal_body(chat)?;
    let response = state.transport.post_json(&url, auth, body).await?;

    let status = response.status();
    if status != http::StatusCode::OK {
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.unwrap_or_default();
        return Err(ProxyError::UpstreamStatus {
            status: status.as_u16(),
            content_type,
            body,
        });
    }

    if !chat.stream {
        let upstream: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::UpstreamDecode(e.to_string()))?;
        let message = assemble_message(&upstream)?;
        return Ok(axum::Json(message).into_response());
    }

    Ok(streaming_response(response.bytes_stream()))
}

struct PendingFrames {
    frames: SmallVec<[Bytes; 8]>,
    head: usize,
}

impl PendingFrames {
    #[inline]
    fn new() -> Self {
        Self {
            frames: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Bytes> {
        if self.head >= self.frames.len() {
            return None;
        }
        let frame = std::mem::take(&mut self.frames[self.head]);
        self.head += 1;
        if self.head == self.frames.len() {
            self.frames.clear();
            self.head = 0;
        }
        Some(frame)
    }

    #[inline]
    fn extend_from_vec(&mut self, produced: &mut Vec<Bytes>) {
        if produced.is_empty() {
            return;
        }
        self.frames.reserve(produced.len());
        self.frames.extend(produced.drain(..));
    }
}

/// Run the streaming FSM over the upstream body and expose the frames
/// as the client SSE response.
///
/// Each frame is its own body chunk so clients see incremental bytes
/// after every upstream chunk. A truncated upstream (EOF without
/// `[DONE]`) ends the body without trailer frames.
fn streaming_response<S, E>(byte_stream: S) -> Response
where
    S: futures_util::Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Debug + Send + 'static,
{
    let lines = sse_line_stream(byte_stream);

    let output = futures_util::stream::unfold(
        (
            Box::pin(lines),
            StreamTranslator::new(),
            Vec::<Bytes>::with_capacity(8),
            PendingFrames::new(),
            false,
        ),
        |(mut lines, mut translator, mut produced, mut pending, mut done)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((frame, (lines, translator, produced, pending, done)));
                }
                if done {
                    return None;
                }
                match lines.as_mut().next().await {
                    Some(line) => {
                        if translator.push_line(&line, &mut produced) {
                            done = true;
                        }
                        pending.extend_from_vec(&mut produced);
                    }
                    None => {
                        done = true;
                    }
                }
            }
        },
    );

    let body = axum::body::Body::from_stream(
        output.map(Ok::<Bytes, std::convert::Infallible>),
    );
    sse_ok_response(body)
}

fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
