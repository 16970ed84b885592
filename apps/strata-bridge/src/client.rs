//! # Strata Core HTTP Client
//!
//! Thin wrapper around `reqwest` that sends a request to the core and hands
//! back its status, content type and body untouched. Only transport
//! failures become errors; HTTP error statuses are data to be relayed.

use axum::body::Bytes;
use axum::http::{HeaderValue, Method, StatusCode, header};
use std::time::Duration;
use thiserror::Error;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Cannot reach the core service.
    #[error("Cannot connect to Strata core at {0}")]
    ConnectionFailed(String),

    /// The core did not answer within the configured timeout.
    #[error("Strata core did not respond within {0:?}")]
    Timeout(Duration),

    /// Any other failure while sending or reading the response.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A core response, relayed verbatim.
#[derive(Debug, Clone)]
pub struct CoreResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// HTTP client bound to one core base URL.
#[derive(Debug, Clone)]
pub struct CoreClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CoreClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else if err.is_connect() {
            ClientError::ConnectionFailed(self.base_url.clone())
        } else {
            ClientError::Transport(err.to_string())
        }
    }

    /// Send `method path_and_query` with an optional JSON body.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> Result<CoreResponse, ClientError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.header(header::CONTENT_TYPE, "application/json").body(body);
        }

        let resp = req.send().await.map_err(|e| self.classify(e))?;
        let status = resp.status();
        let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
        let body = resp.bytes().await.map_err(|e| self.classify(e))?;
        Ok(CoreResponse {
            status,
            content_type,
            body,
        })
    }

    /// Whether the core answers its health check with a success status.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let resp = self.forward(Method::GET, "/health", None).await?;
        Ok(resp.status.is_success())
    }
}
