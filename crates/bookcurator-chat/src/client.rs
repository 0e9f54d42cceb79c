use std::time::Duration;

use tracing::debug;

use crate::config::env_or;
use crate::decoder::{EventStream, decode_stream};
use crate::errors::{ChatError, TransportError};

/// Default number of books the backend is asked to recommend.
pub const DEFAULT_MAX_BOOKS: u8 = 6;
const MAX_BOOKS_LIMIT: u8 = 20;

/// Body of `POST /api/recommend`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecommendRequest {
    pub query: String,
    pub max_books: u8,
    pub google_api_key: String,
}

impl RecommendRequest {
    pub fn new(query: impl Into<String>, google_api_key: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_books: DEFAULT_MAX_BOOKS,
            google_api_key: google_api_key.into(),
        }
    }

    /// Sets the requested book count, clamped to the range the backend accepts.
    pub fn max_books(mut self, max_books: u8) -> Self {
        self.max_books = max_books.clamp(1, MAX_BOOKS_LIMIT);
        self
    }
}

/// Source of recommendation event streams.
///
/// The HTTP implementation is [`HttpRecommendBackend`]; tests substitute
/// scripted streams.
#[async_trait::async_trait]
pub trait RecommendBackend: Send + Sync {
    /// Sends one request and returns its lazily decoded events.
    async fn open_stream(&self, request: RecommendRequest) -> Result<EventStream, TransportError>;
}

/// Configuration for [`HttpRecommendBackend`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Gateway base URL, for example `http://localhost:80`.
    pub base_url: String,
    /// Limit on establishing the connection.
    pub connect_timeout: Duration,
    /// Limit on each read, so a slow but live stream is never cut off.
    pub read_timeout: Duration,
    /// Book count sent with every request.
    pub max_books: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:80".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            max_books: DEFAULT_MAX_BOOKS,
        }
    }
}

impl ClientConfig {
    /// Builds a config from `BOOKCURATOR_API_URL`, `BOOKCURATOR_MAX_BOOKS`,
    /// `BOOKCURATOR_CONNECT_TIMEOUT_SECS` and `BOOKCURATOR_READ_TIMEOUT_SECS`,
    /// using defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_or("BOOKCURATOR_API_URL", defaults.base_url),
            connect_timeout: Duration::from_secs(env_or(
                "BOOKCURATOR_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )),
            read_timeout: Duration::from_secs(env_or(
                "BOOKCURATOR_READ_TIMEOUT_SECS",
                defaults.read_timeout.as_secs(),
            )),
            max_books: env_or("BOOKCURATOR_MAX_BOOKS", DEFAULT_MAX_BOOKS).clamp(1, MAX_BOOKS_LIMIT),
        }
    }

    /// Overrides the gateway base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the per-read timeout; it resets on every received chunk.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Overrides the requested book count.
    pub fn max_books(mut self, max_books: u8) -> Self {
        self.max_books = max_books.clamp(1, MAX_BOOKS_LIMIT);
        self
    }

    pub(crate) fn recommend_url(&self) -> String {
        format!("{}/api/recommend", self.base_url.trim_end_matches('/'))
    }
}

/// Streams recommendations from the gateway over HTTP.
pub struct HttpRecommendBackend {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpRecommendBackend {
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        if config.base_url.trim().is_empty() {
            return Err(ChatError::Config("base_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(ClientConfig::from_env())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl RecommendBackend for HttpRecommendBackend {
    async fn open_stream(&self, request: RecommendRequest) -> Result<EventStream, TransportError> {
        let url = self.config.recommend_url();
        debug!(%url, max_books = request.max_books, "opening recommend stream");

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(status.as_u16(), body));
        }

        Ok(decode_stream(response.bytes_stream()))
    }
}
