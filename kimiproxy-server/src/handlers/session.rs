use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use serde::Deserialize;
use shared::models::session::{SessionInfoResponse, SessionResetResponse};
use tracing::info;

use crate::app_state::AppState;
use crate::handlers::session_key::{resolve_session_key, session_cookie};

/// Optional reset body naming the session to clear; absent, the key is
/// resolved from headers and cookies like everywhere else.
#[derive(Debug, Default, Deserialize)]
pub struct SessionSelector {
    pub session_id: Option<String>,
}

/// `GET /v1/session`: which session key this request resolves to, plus live
/// session state when one exists. Resolving with no key at all mints one and
/// sets the cookie, so a browser client can inspect its key before chatting.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let resolved = resolve_session_key(&headers, None, &state.config.session.cookie_name);

    let mut body = SessionInfoResponse {
        session_key: resolved.key.clone(),
        upstream_session_id: None,
        turn_count: None,
        ttl_ms_remaining: None,
    };
    if let Some(live) = state.sessions.info(&resolved.key).await {
        body.upstream_session_id = Some(live.upstream_session_id);
        body.turn_count = Some(live.turn_count);
        body.ttl_ms_remaining = Some(live.ttl_remaining.as_millis().min(u64::MAX as u128) as u64);
    }

    let mut response = Json(body).into_response();
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
    response
}

/// `POST /v1/session/reset`: drops the proxy-side conversation so the next
/// completion starts with a fresh upstream session id and empty history.
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<SessionSelector>>,
) -> Json<SessionResetResponse> {
    let selector = body.map(|Json(selector)| selector).unwrap_or_default();
    let resolved = resolve_session_key(
        &headers,
        selector.session_id.as_deref(),
        &state.config.session.cookie_name,
    );

    let cleared = state.sessions.clear(&resolved.key).await;
    info!(session_key = %resolved.key, cleared, "session reset requested");

    Json(SessionResetResponse { ok: true, cleared })
}
