use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use shared::models::chat::{Model, ModelsResponse, OBJECT_LIST, OBJECT_MODEL};

use crate::app_state::AppState;

/// `GET /v1/models`: the configured catalog in OpenAI list form.
pub async fn get_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let created = Utc::now().timestamp();
    let data = state
        .config
        .models
        .known
        .iter()
        .map(|entry| Model {
            id: entry.id.clone(),
            object: OBJECT_MODEL.to_string(),
            created,
            owned_by: entry.owned_by.clone(),
        })
        .collect();

    Json(ModelsResponse {
        object: OBJECT_LIST.to_string(),
        data,
    })
}
