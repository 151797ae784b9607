use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

/// The main configuration structure for the kimiproxy gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// In-memory session cache settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Upstream kimi-ai.chat endpoints.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Known model catalog.
    #[serde(default)]
    pub models: ModelCatalog,

    /// Simulated-streaming settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Port for the HTTP server.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8088 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Idle lifetime of a conversation session, in seconds.
    pub ttl_seconds: u64,

    /// Name of the session cookie issued to callers without a key.
    pub cookie_name: String,

    /// Upper bound on stored turns per session. `None` keeps the full
    /// history for the session's lifetime.
    pub max_history_turns: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            cookie_name: "sid".to_string(),
            max_history_turns: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    /// admin-ajax endpoint that answers chat messages.
    pub endpoint_url: String,

    /// Chat page whose HTML embeds the anti-CSRF nonce.
    pub chat_page_url: String,

    /// User-Agent sent on every outbound request.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://kimi-ai.chat/wp-admin/admin-ajax.php".to_string(),
            chat_page_url: "https://kimi-ai.chat/chat/".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// One entry of the known model catalog: the identifier callers use and the
/// model string the upstream expects.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KnownModel {
    pub id: String,
    pub upstream_name: String,
    pub owned_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    /// Model used when a request does not name one.
    pub default: String,

    /// The exact set of accepted model identifiers.
    pub known: Vec<KnownModel>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            default: "kimi-k2-instruct-0905".to_string(),
            known: vec![
                KnownModel {
                    id: "kimi-k2-instruct-0905".to_string(),
                    upstream_name: "moonshotai/Kimi-K2-Instruct-0905".to_string(),
                    owned_by: "kimi-ai".to_string(),
                },
                KnownModel {
                    id: "kimi-k2-instruct".to_string(),
                    upstream_name: "moonshotai/Kimi-K2-Instruct".to_string(),
                    owned_by: "kimi-ai".to_string(),
                },
            ],
        }
    }
}

impl ModelCatalog {
    /// Returns the upstream model string for a known identifier.
    #[must_use]
    pub fn upstream_name(&self, id: &str) -> Option<&str> {
        self.known
            .iter()
            .find(|model| model.id == id)
            .map(|model| model.upstream_name.as_str())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.known.iter().any(|model| model.id == id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Delay between emitted characters, in milliseconds. The upstream
    /// answers with one complete message; streaming is simulated by pacing.
    pub char_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { char_delay_ms: 20 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Logging level directive (e.g. `info`, `server=debug`).
    pub level: String,

    /// Output format of the tracing subscriber.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            upstream: UpstreamConfig::default(),
            models: ModelCatalog::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// File values take precedence over environment variables; environment
    /// variables only fill in values still at their defaults. A CLI port
    /// override wins over everything.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// override is malformed, or the resolved configuration is invalid.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Config::with_defaults();

        // Load from file if provided
        if let Some(path) = config_path {
            let content = fs::read_to_string(&path)?;
            config = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => serde_yml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                _ => {
                    return Err("Unsupported configuration format. Use 'yaml' or 'json'.".into());
                }
            };
        }

        let defaults = Config::with_defaults();

        if config.server.port == defaults.server.port {
            if let Ok(port) = env::var("KIMIPROXY_SERVER_PORT") {
                config.server.port = port.parse().map_err(|_| {
                    "Invalid KIMIPROXY_SERVER_PORT value: must be a valid number between 1 and 65535"
                })?;
            }
        }
        if config.session.ttl_seconds == defaults.session.ttl_seconds {
            if let Ok(ttl) = env::var("KIMIPROXY_SESSION_TTL") {
                config.session.ttl_seconds = ttl.parse().map_err(|_| {
                    "Invalid KIMIPROXY_SESSION_TTL value: must be a number of seconds"
                })?;
            }
        }
        if config.upstream.endpoint_url == defaults.upstream.endpoint_url {
            if let Ok(url) = env::var("KIMIPROXY_UPSTREAM_URL") {
                config.upstream.endpoint_url = url;
            }
        }
        if config.upstream.chat_page_url == defaults.upstream.chat_page_url {
            if let Ok(url) = env::var("KIMIPROXY_CHAT_PAGE_URL") {
                config.upstream.chat_page_url = url;
            }
        }
        if config.models.default == defaults.models.default {
            if let Ok(model) = env::var("KIMIPROXY_DEFAULT_MODEL") {
                config.models.default = model;
            }
        }
        if config.stream.char_delay_ms == defaults.stream.char_delay_ms {
            if let Ok(delay) = env::var("KIMIPROXY_CHAR_DELAY_MS") {
                config.stream.char_delay_ms = delay.parse().map_err(|_| {
                    "Invalid KIMIPROXY_CHAR_DELAY_MS value: must be a number of milliseconds"
                })?;
            }
        }
        if config.logging.level == defaults.logging.level {
            if let Ok(level) = env::var("KIMIPROXY_LOG_LEVEL") {
                config.logging.level = level;
            }
        }

        // Override with command-line arguments if provided
        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate().map_err(|errors| errors.join("; "))?;

        Ok(config)
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    /// Returns every validation failure found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port. Must be greater than 0.".to_string());
        }

        if self.session.ttl_seconds == 0 {
            errors.push("Invalid session TTL. Must be greater than 0.".to_string());
        }

        if self.models.known.is_empty() {
            errors.push("Model catalog must contain at least one model.".to_string());
        } else if !self.models.contains(&self.models.default) {
            errors.push(format!(
                "Default model '{}' is not in the known model catalog.",
                self.models.default
            ));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
