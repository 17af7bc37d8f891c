//! Transport to the conversation backend.
//!
//! [`ConversationTransport`] is the seam between the controller and the
//! network: it issues one request and classifies the answer as either a
//! complete JSON reply or a decoded event stream. [`HttpTransport`] is the
//! reqwest-backed implementation.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use url::Url;

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::stream::{EventStream, decode};
use crate::wire::{ConversationReply, ConversationRequest};

/// Classified backend answer.
pub enum Reply {
    /// `application/json` body, fully read.
    Json(ConversationReply),
    /// Anything else, decoded lazily as an event stream.
    Stream(EventStream),
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(reply) => f.debug_tuple("Json").field(reply).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").field(&"EventStream").finish(),
        }
    }
}

/// Issues conversation requests.
#[async_trait::async_trait]
pub trait ConversationTransport: Send + Sync {
    /// Send `request` on behalf of `user_id` and classify the answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the backend answers with a
    /// failing status, or a streamed answer has no body.
    async fn start(&self, user_id: &str, request: ConversationRequest) -> Result<Reply>;
}

/// HTTP transport for the conversation endpoint.
///
/// # Example
///
/// ```rust
/// use agent_chat_client::transport::HttpTransport;
///
/// let transport = HttpTransport::new("http://127.0.0.1:8080").unwrap();
/// let url = transport.conversation_url("u-1").unwrap();
/// assert_eq!(url.as_str(), "http://127.0.0.1:8080/conversation/u-1?sid=u-1");
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default HTTP client.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a transport with a custom reqwest client.
    pub fn with_client(base_url: impl AsRef<str>, http: reqwest::Client) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self { base_url, http })
    }

    /// Create a transport from configuration.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Self::with_client(&config.base_url, http)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Per-user conversation endpoint: `<base>/conversation/<user>?sid=<user>`.
    pub fn conversation_url(&self, user_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .push("conversation")
            .push(user_id);
        url.query_pairs_mut().append_pair("sid", user_id);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl ConversationTransport for HttpTransport {
    async fn start(&self, user_id: &str, request: ConversationRequest) -> Result<Reply> {
        let url = self.conversation_url(user_id)?;
        tracing::debug!(url = %url, "Posting conversation request");

        let response = self.http.post(url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tracing::debug!(status = %status, content_type = %content_type, "Conversation reply received");

        if content_type.contains("application/json") {
            let reply: ConversationReply = response.json().await?;
            return Ok(Reply::Json(reply));
        }

        if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(Error::StreamUnavailable);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Decode(e.to_string())));
        Ok(Reply::Stream(decode(body)))
    }
}
