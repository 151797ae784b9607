use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::services::transport::UpstreamTransport;

/// Errors raised while scraping the anti-CSRF nonce out of the upstream chat
/// page. Cloneable because the fetch future is shared between callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NonceError {
    #[error("failed to fetch upstream chat page: {0}")]
    Fetch(String),
    #[error("upstream chat page returned status {0}")]
    Status(u16),
    #[error("no 'kimi_ajax' bootstrap object found in chat page HTML")]
    Missing,
    #[error("'kimi_ajax' bootstrap object is malformed: {0}")]
    Malformed(String),
}

type SharedFetch = Shared<BoxFuture<'static, Result<String, NonceError>>>;

/// Single-slot cache of the upstream nonce.
///
/// The slot holds one shared fetch future: while pending it de-duplicates
/// concurrent scrapes, once resolved it is the cached value. A failed fetch
/// clears the slot so the next caller retries.
pub struct NonceSource {
    chat_page_url: String,
    transport: Arc<dyn UpstreamTransport>,
    slot: Mutex<Option<SharedFetch>>,
}

impl NonceSource {
    #[must_use]
    pub fn new(chat_page_url: String, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            chat_page_url,
            transport,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached nonce, joining an in-flight fetch when one exists.
    /// `force_refresh` discards the slot and scrapes the page again, which is
    /// the recovery path when an upstream call fails on a presumed-stale
    /// nonce.
    ///
    /// # Errors
    /// Propagates the fetch failure to every caller awaiting it.
    pub async fn get(&self, force_refresh: bool) -> Result<String, NonceError> {
        let fetch = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(fetch) if !force_refresh => fetch.clone(),
                _ => {
                    let fetch = fetch_nonce(self.transport.clone(), self.chat_page_url.clone())
                        .boxed()
                        .shared();
                    *slot = Some(fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.await;

        if result.is_err() {
            // Clear the slot so a later request can retry the scrape.
            let mut slot = self.slot.lock().await;
            *slot = None;
        }

        result
    }

    /// Fire-and-forget startup prefetch so the first chat request does not
    /// pay the scrape latency.
    pub fn warm(self: &Arc<Self>) {
        let source = Arc::clone(self);
        tokio::spawn(async move {
            match source.get(false).await {
                Ok(_) => info!("nonce prefetched from upstream chat page"),
                Err(err) => warn!(error = %err, "nonce prefetch failed"),
            }
        });
    }
}

fn bootstrap_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"var kimi_ajax = (\{.*?\});").expect("bootstrap pattern is valid")
    })
}

async fn fetch_nonce(
    transport: Arc<dyn UpstreamTransport>,
    chat_page_url: String,
) -> Result<String, NonceError> {
    debug!(url = %chat_page_url, "scraping nonce from upstream chat page");

    let result = scrape(transport, &chat_page_url).await;
    match &result {
        Ok(nonce) => {
            metrics::counter!("nonce_fetch_total", "status" => "ok").increment(1);
            info!(nonce = %nonce, "scraped fresh nonce");
        }
        Err(err) => {
            metrics::counter!("nonce_fetch_total", "status" => "error").increment(1);
            warn!(error = %err, "nonce scrape failed");
        }
    }
    result
}

async fn scrape(
    transport: Arc<dyn UpstreamTransport>,
    chat_page_url: &str,
) -> Result<String, NonceError> {
    let page = transport
        .get_text(chat_page_url)
        .await
        .map_err(|err| NonceError::Fetch(err.to_string()))?;

    if !page.status.is_success() {
        return Err(NonceError::Status(page.status.as_u16()));
    }

    let captures = bootstrap_pattern()
        .captures(&page.body)
        .ok_or(NonceError::Missing)?;

    let bootstrap: Value = serde_json::from_str(&captures[1])
        .map_err(|err| NonceError::Malformed(err.to_string()))?;

    bootstrap
        .get("nonce")
        .and_then(Value::as_str)
        .filter(|nonce| !nonce.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NonceError::Malformed("missing 'nonce' field".to_string()))
}
