use std::sync::Arc;
use std::time::Duration;

use shared::config::server::Config;

use crate::services::{
    chat_service::ChatService,
    nonce::NonceSource,
    session_store::SessionStore,
    transport::{HttpTransport, UpstreamTransport},
    upstream::UpstreamClient,
};

/// Shared per-process state handed to every handler. All services are built
/// once at startup and injected here; handlers never construct their own.
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub nonce: Arc<NonceSource>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    /// Production wiring over a real HTTP client.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        let transport: Arc<dyn UpstreamTransport> =
            Arc::new(HttpTransport::new(config.upstream.user_agent.clone()));
        Self::with_transport(config, transport)
    }

    /// Same wiring with the transport swapped out, so tests drive the whole
    /// stack without touching the network.
    #[must_use]
    pub fn with_transport(config: Arc<Config>, transport: Arc<dyn UpstreamTransport>) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Duration::from_secs(config.session.ttl_seconds),
            config.session.max_history_turns,
        ));
        let nonce = Arc::new(NonceSource::new(
            config.upstream.chat_page_url.clone(),
            Arc::clone(&transport),
        ));
        let upstream = Arc::new(UpstreamClient::new(
            config.upstream.endpoint_url.clone(),
            config.models.clone(),
            transport,
        ));
        let chat = Arc::new(ChatService::new(
            Arc::clone(&config),
            Arc::clone(&nonce),
            Arc::clone(&sessions),
            Arc::clone(&upstream),
        ));

        Self {
            config,
            sessions,
            nonce,
            chat,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        use crate::services::transport::{TransportError, UpstreamBody};
        use async_trait::async_trait;

        struct OfflineTransport;

        #[async_trait]
        impl UpstreamTransport for OfflineTransport {
            async fn get_text(&self, _url: &str) -> Result<UpstreamBody, TransportError> {
                Err(TransportError("offline".to_string()))
            }

            async fn post_form(
                &self,
                _url: &str,
                _fields: &[(&str, &str)],
            ) -> Result<UpstreamBody, TransportError> {
                Err(TransportError("offline".to_string()))
            }
        }

        Self::with_transport(Arc::new(Config::with_defaults()), Arc::new(OfflineTransport))
    }
}
