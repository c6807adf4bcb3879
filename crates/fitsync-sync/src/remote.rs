// ABOUTME: Remote API seam: the RemoteApi trait and its reqwest-backed HTTP/JSON implementation.
// ABOUTME: Classifies failures into retryable (timeout, connection, 5xx) and permanent (4xx) errors.

use std::time::Duration;

use async_trait::async_trait;
use fitsync_core::HttpMethod;
use serde_json::Value;
use thiserror::Error;

use crate::config::SyncConfig;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Errors that can occur when talking to the remote API.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("request rejected with {status}: {body}")]
    Client { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// Transient failures that should drive offline fallback and later retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Timeout | RemoteError::Connection(_) | RemoteError::Server { .. }
        )
    }

    /// Failures that suggest the network itself is gone, as opposed to the
    /// server answering badly.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Timeout | RemoteError::Connection(_))
    }

    /// HTTP status carried by the error, if the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Server { status, .. } | RemoteError::Client { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// The REST backend as seen by the sync core. Successful calls return the
/// decoded JSON body, or `Value::Null` for an empty body.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn get(&self, endpoint: &str) -> Result<Value, RemoteError>;

    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<Value, RemoteError>;
}

/// HTTP/JSON client for the backend, with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    /// Create a client with explicit configuration.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, RemoteError> {
        Self::new(
            config.api_url.clone(),
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve an endpoint against the base URL. Absolute URLs pass through.
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Whether the backend answers at all. Any HTTP response, even an error
    /// status, counts as reachable.
    pub async fn probe(&self, path: &str) -> bool {
        match self.client.get(self.url(path)).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("reachability probe failed: {}", e);
                false
            }
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()));
        }

        let body = truncate(body);
        if status.is_client_error() {
            Err(RemoteError::Client {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(RemoteError::Server {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn get(&self, endpoint: &str) -> Result<Value, RemoteError> {
        self.execute(self.client.get(self.url(endpoint))).await
    }

    async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let url = self.url(endpoint);
        let mut request = match method {
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        if let Some(payload) = payload {
            request = request.json(payload);
        }
        self.execute(request).await
    }
}

fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_builder() {
        RemoteError::InvalidRequest(err.to_string())
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Connection(err.to_string())
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
