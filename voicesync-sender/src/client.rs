use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use voicesync_core::{SYNC_PATH, SyncMessage, default_port, validate_content};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("content must not be empty")]
    EmptyContent,
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to encode message: {0}")]
    Encode(String),
    /// Connection refused, timeout, unreachable host; carries the transport's own text.
    #[error("{0}")]
    Transport(String),
    #[error("server returned {0}")]
    Status(u16),
}

/// Anything that can deliver a [`SyncMessage`] to a receiver.
pub trait SyncTransport: Send + Sync + 'static {
    /// The receiver address this transport delivers to, as the user entered it.
    fn address(&self) -> &str;

    fn send(&self, message: SyncMessage) -> BoxFuture<'static, Result<(), SendError>>;
}

/// Receiver on this machine at the port the receiver binds by default.
pub fn default_address() -> String {
    format!("127.0.0.1:{}", default_port())
}

/// Build the `/sync` endpoint for a user-entered address.
///
/// `host:port` gets an `http://` prefix; an address with an explicit
/// `http://` or `https://` scheme is used as the base as-is.
pub fn sync_url(address: &str) -> Result<Url, SendError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(SendError::InvalidAddress {
            address: address.to_owned(),
            reason: "address is empty".to_owned(),
        });
    }

    let lowered = address.to_ascii_lowercase();
    let base = if lowered.starts_with("http://") || lowered.starts_with("https://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    };
    let raw = format!("{}{}", base.trim_end_matches('/'), SYNC_PATH);
    Url::parse(&raw).map_err(|err| SendError::InvalidAddress {
        address: address.to_owned(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    address: String,
    endpoint: Url,
}

impl SyncClient {
    pub fn new(address: &str) -> Result<Self, SendError> {
        Ok(Self {
            http: reqwest::Client::new(),
            address: address.trim().to_owned(),
            endpoint: sync_url(address)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST the structured form of `message`. No retries; the transport's default timeouts apply.
    pub async fn send_message(&self, message: &SyncMessage) -> Result<(), SendError> {
        validate_content(&message.content).map_err(|_| SendError::EmptyContent)?;
        let body = message
            .encode()
            .map_err(|err| SendError::Encode(err.to_string()))?;

        debug!(
            endpoint = %self.endpoint,
            chars = message.content.chars().count(),
            auto_enter = message.auto_enter,
            "sending sync request"
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|err| {
                warn!(endpoint = %self.endpoint, "sync request failed: {err}");
                SendError::Transport(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = %self.endpoint, status = status.as_u16(), "receiver rejected sync");
            return Err(SendError::Status(status.as_u16()));
        }
        Ok(())
    }
}

impl SyncTransport for SyncClient {
    fn address(&self) -> &str {
        &self.address
    }

    fn send(&self, message: SyncMessage) -> BoxFuture<'static, Result<(), SendError>> {
        let client = self.clone();
        Box::pin(async move { client.send_message(&message).await })
    }
}
