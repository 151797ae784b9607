use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use chrono::Utc;
use shared::config::server::Config;
use shared::models::chat::{ChatCompletionChunk, ChatCompletionRequest};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

use crate::services::{
    nonce::NonceSource,
    prompt::build_contextual_prompt,
    session_store::SessionStore,
    upstream::UpstreamClient,
};

/// Content of the terminal chunk streamed when both upstream attempts fail;
/// the upstream's own wording.
pub const UPSTREAM_FAILURE_MESSAGE: &str = "重试后上游请求依然失败";

/// One initial attempt plus one retry with a force-refreshed nonce.
const MAX_UPSTREAM_ATTEMPTS: u32 = 2;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Failures surfaced before the SSE stream starts, as HTTP 4xx.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
}

/// Orchestrates one chat completion: session lookup, prompt assembly, the
/// bounded upstream retry, session update, and character-paced SSE emission.
pub struct ChatService {
    config: Arc<Config>,
    nonce: Arc<NonceSource>,
    sessions: Arc<SessionStore>,
    upstream: Arc<UpstreamClient>,
}

impl ChatService {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        nonce: Arc<NonceSource>,
        sessions: Arc<SessionStore>,
        upstream: Arc<UpstreamClient>,
    ) -> Self {
        Self {
            config,
            nonce,
            sessions,
            upstream,
        }
    }

    /// Validates the request and spawns the streaming task. Everything
    /// emitted after this returns — including upstream failures — travels
    /// through the returned event stream; a dropped receiver stops the
    /// emission loop.
    ///
    /// # Errors
    /// [`ChatError`] for malformed message lists and unknown models, before
    /// any upstream traffic.
    pub async fn start_completion(
        &self,
        session_key: String,
        request: ChatCompletionRequest,
    ) -> Result<ReceiverStream<Event>, ChatError> {
        let last_message = request.messages.last().ok_or_else(|| {
            ChatError::Validation("'messages' must not be empty".to_string())
        })?;
        if !last_message.role.eq_ignore_ascii_case("user") {
            return Err(ChatError::Validation(
                "the last entry of 'messages' must have role 'user'".to_string(),
            ));
        }

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.models.default.clone());
        if !self.config.models.contains(&model) {
            return Err(ChatError::UnsupportedModel(model));
        }

        let user_content = last_message.content.clone();
        let snapshot = self.sessions.get_or_create(&session_key).await;
        let prompt = build_contextual_prompt(&snapshot.history, &user_content);

        let completion_id = format!("chatcmpl-{}", Uuid::new_v4());
        let created = Utc::now().timestamp();
        let char_delay = Duration::from_millis(self.config.stream.char_delay_ms);

        let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        let worker = CompletionWorker {
            nonce: Arc::clone(&self.nonce),
            sessions: Arc::clone(&self.sessions),
            upstream: Arc::clone(&self.upstream),
            session_key,
            upstream_session_id: snapshot.upstream_session_id,
            prompt,
            user_content,
            model,
            completion_id,
            created,
            char_delay,
        };
        tokio::spawn(worker.run(tx));

        Ok(ReceiverStream::new(rx))
    }
}

struct CompletionWorker {
    nonce: Arc<NonceSource>,
    sessions: Arc<SessionStore>,
    upstream: Arc<UpstreamClient>,
    session_key: String,
    upstream_session_id: String,
    prompt: String,
    user_content: String,
    model: String,
    completion_id: String,
    created: i64,
    char_delay: Duration,
}

impl CompletionWorker {
    async fn run(self, tx: mpsc::Sender<Event>) {
        match self.call_with_retry().await {
            Ok(reply) => self.stream_reply(&tx, reply).await,
            Err(last_error) => self.stream_failure(&tx, &last_error).await,
        }
    }

    /// Bounded attempt loop: the second (final) attempt force-refreshes the
    /// nonce, since an expired nonce is the presumed cause of any failure.
    async fn call_with_retry(&self) -> Result<String, String> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_UPSTREAM_ATTEMPTS {
            let force_refresh = attempt > 1;
            if force_refresh {
                warn!(
                    attempt,
                    reason = %last_error,
                    "upstream call failed; refreshing nonce and retrying"
                );
            }

            let nonce = match self.nonce.get(force_refresh).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    last_error = err.to_string();
                    continue;
                }
            };

            match self
                .upstream
                .send(&self.prompt, &self.model, &self.upstream_session_id, &nonce)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(err) => last_error = err.to_string(),
            }
        }

        Err(last_error)
    }

    async fn stream_reply(&self, tx: &mpsc::Sender<Event>, reply: String) {
        self.sessions
            .record_turn(&self.session_key, self.user_content.clone(), reply.clone())
            .await;
        metrics::counter!("chat_completions_total", "outcome" => "ok").increment(1);

        for character in reply.chars() {
            let chunk = ChatCompletionChunk::delta(
                &self.completion_id,
                self.created,
                &self.model,
                character.to_string(),
            );
            if self.emit(tx, &chunk).await.is_err() {
                // Client went away; stop pacing out the rest.
                return;
            }
            if !self.char_delay.is_zero() {
                tokio::time::sleep(self.char_delay).await;
            }
        }

        let finish =
            ChatCompletionChunk::finish(&self.completion_id, self.created, &self.model, "stop");
        if self.emit(tx, &finish).await.is_ok() {
            let _ = tx.send(done_event()).await;
        }
    }

    async fn stream_failure(&self, tx: &mpsc::Sender<Event>, last_error: &str) {
        metrics::counter!("chat_completions_total", "outcome" => "error").increment(1);
        warn!(error = %last_error, "upstream call still failing after retry");

        let chunk = ChatCompletionChunk::terminal_content(
            &self.completion_id,
            self.created,
            &self.model,
            UPSTREAM_FAILURE_MESSAGE.to_string(),
            "stop",
        );
        if self.emit(tx, &chunk).await.is_ok() {
            let _ = tx.send(done_event()).await;
        }
    }

    async fn emit(&self, tx: &mpsc::Sender<Event>, chunk: &ChatCompletionChunk) -> Result<(), ()> {
        let data = match serde_json::to_string(chunk) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "failed to encode completion chunk");
                return Err(());
            }
        };
        tx.send(Event::default().data(data)).await.map_err(|_| ())
    }
}

fn done_event() -> Event {
    Event::default().data("[DONE]")
}
