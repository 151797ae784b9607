use async_trait::async_trait;
use http::StatusCode;
use reqwest::header::USER_AGENT;
use thiserror::Error;

/// Status and text body of one upstream exchange.
#[derive(Debug, Clone)]
pub struct UpstreamBody {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, Clone, Error)]
#[error("upstream transport error: {0}")]
pub struct TransportError(pub String);

/// Outbound HTTP seam. The upstream is reached exclusively through this
/// trait, so tests substitute scripted responses without a network.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<UpstreamBody, TransportError>;

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<UpstreamBody, TransportError>;
}

/// Production transport backed by [`reqwest`], presenting a realistic
/// browser User-Agent on every request.
pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpTransport {
    #[must_use]
    pub fn new(user_agent: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent,
        }
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn get_text(&self, url: &str) -> Result<UpstreamBody, TransportError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError(err.to_string()))?;

        Ok(UpstreamBody { status, body })
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<UpstreamBody, TransportError> {
        let response = self
            .client
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .form(fields)
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError(err.to_string()))?;

        Ok(UpstreamBody { status, body })
    }
}
