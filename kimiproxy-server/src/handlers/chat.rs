use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use shared::models::chat::ChatCompletionRequest;
use tracing::debug;

use crate::app_state::AppState;
use crate::handlers::session_key::{resolve_session_key, session_cookie};
use crate::http::error::ApiError;

/// `POST /v1/chat/completions`. Always streams: the response is SSE with
/// one chunk per character of the upstream reply, a `finish_reason: "stop"`
/// chunk, and a final `[DONE]` sentinel.
pub async fn post_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    // `session_id` is this proxy's extension; `user` is the OpenAI field
    // clients already send, folded in as a fallback.
    let body_key = request
        .session_id
        .as_deref()
        .or(request.user.as_deref());
    let resolved = resolve_session_key(&headers, body_key, &state.config.session.cookie_name);
    debug!(
        session_key = %resolved.key,
        generated = resolved.generated,
        "starting chat completion"
    );

    let stream = state
        .chat
        .start_completion(resolved.key.clone(), request)
        .await?;

    let mut response = Sse::new(stream.map(Ok::<_, Infallible>))
        .keep_alive(KeepAlive::default())
        .into_response();

    if resolved.generated {
        let cookie = session_cookie(
            &state.config.session.cookie_name,
            &resolved.key,
            state.config.session.ttl_seconds,
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }

    Ok(response)
}
