use std::sync::Arc;

use serde_json::Value;
use shared::config::server::ModelCatalog;
use thiserror::Error;
use tracing::{debug, info};

use crate::services::transport::UpstreamTransport;

/// admin-ajax action tag understood by the upstream WordPress plugin.
const SEND_MESSAGE_ACTION: &str = "kimi_send_message";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("upstream rejected the request: {0}")]
    Rejected(String),
    #[error("upstream returned a malformed body: {0}")]
    Malformed(String),
}

/// Client for the upstream chat endpoint: resolves the caller-facing model
/// identifier, posts the prepared prompt, and parses the single synchronous
/// reply.
pub struct UpstreamClient {
    endpoint_url: String,
    catalog: ModelCatalog,
    transport: Arc<dyn UpstreamTransport>,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(
        endpoint_url: String,
        catalog: ModelCatalog,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Self {
        Self {
            endpoint_url,
            catalog,
            transport,
        }
    }

    /// Sends one prepared prompt and returns the assistant's full reply
    /// text. An empty-but-successful reply is returned as an empty string,
    /// not an error.
    ///
    /// # Errors
    /// Fails with [`UpstreamError::UnsupportedModel`] before any network
    /// call for identifiers outside the catalog, and with the other
    /// variants for transport, status, and protocol failures.
    pub async fn send(
        &self,
        prompt: &str,
        model_id: &str,
        upstream_session_id: &str,
        nonce: &str,
    ) -> Result<String, UpstreamError> {
        let upstream_model = self
            .catalog
            .upstream_name(model_id)
            .ok_or_else(|| UpstreamError::UnsupportedModel(model_id.to_string()))?;

        info!(
            upstream_session_id = %upstream_session_id,
            model = %model_id,
            "sending chat message upstream"
        );

        let fields = [
            ("action", SEND_MESSAGE_ACTION),
            ("nonce", nonce),
            ("message", prompt),
            ("model", upstream_model),
            ("session_id", upstream_session_id),
        ];

        let response = self
            .transport
            .post_form(&self.endpoint_url, &fields)
            .await
            .map_err(|err| {
                metrics::counter!("upstream_requests_total", "status" => "error").increment(1);
                UpstreamError::Transport(err.to_string())
            })?;

        if !response.status.is_success() {
            metrics::counter!("upstream_requests_total", "status" => "error").increment(1);
            return Err(UpstreamError::Status(response.status.as_u16()));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|err| {
            metrics::counter!("upstream_requests_total", "status" => "error").increment(1);
            UpstreamError::Malformed(err.to_string())
        })?;

        if !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
            metrics::counter!("upstream_requests_total", "status" => "rejected").increment(1);
            let detail = body
                .get("data")
                .map(|data| match data {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(UpstreamError::Rejected(detail));
        }

        metrics::counter!("upstream_requests_total", "status" => "ok").increment(1);

        let message = body
            .pointer("/data/message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(chars = message.chars().count(), "upstream reply received");

        Ok(message)
    }
}
