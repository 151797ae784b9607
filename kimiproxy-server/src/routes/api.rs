use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app_state::AppState;
use crate::handlers::{chat, models, root, session};

pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root::get_index))
        .route("/v1/models", get(models::get_models))
        .route("/v1/chat/completions", post(chat::post_chat_completions))
        .route("/v1/session", get(session::get_session))
        .route("/v1/session/reset", post(session::reset_session))
}
