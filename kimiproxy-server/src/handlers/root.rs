use axum::Json;
use serde_json::{json, Value};

/// `GET /`: a small index so hitting the base URL in a browser explains
/// what this service is instead of returning 404.
pub async fn get_index() -> Json<Value> {
    Json(json!({
        "name": "kimiproxy",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /v1/models",
            "POST /v1/chat/completions",
            "GET /v1/session",
            "POST /v1/session/reset",
            "GET /healthz",
            "GET /metrics",
        ],
    }))
}
