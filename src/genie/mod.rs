pub mod client;
pub mod credentials;
pub mod models;
pub mod retry;
pub mod transport;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::error::Error;
use std::fmt;

pub use client::{GenieClient, PollOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum GenieError {
    /// No usable bearer token; raised before any request is made.
    CredentialError,
    /// Non-2xx answer from a Genie or SQL endpoint.
    ProtocolError { status: u16, endpoint: String },
    TransportError(String),
    DecodeError(String),
    /// The statement ran but the warehouse reported FAILED.
    QueryExecutionError(String),
}

impl fmt::Display for GenieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenieError::CredentialError => {
                write!(f, "Not authenticated: no bearer token is available")
            }
            GenieError::ProtocolError { status, endpoint } => {
                write!(f, "HTTP error! status: {} ({})", status, endpoint)
            }
            GenieError::TransportError(msg) => write!(f, "Network error: {}", msg),
            GenieError::DecodeError(msg) => write!(f, "Unexpected response payload: {}", msg),
            GenieError::QueryExecutionError(msg) => write!(f, "SQL execution failed: {}", msg),
        }
    }
}

impl Error for GenieError {}

/// A single request against the workspace REST API.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub bearer_token: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, GenieError> {
        serde_json::from_str(&self.body).map_err(|e| GenieError::DecodeError(e.to_string()))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GenieError>;
}

/// Rejects blank tokens so callers fail before touching the network.
pub(crate) fn require_token(token: &str) -> Result<&str, GenieError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(GenieError::CredentialError);
    }
    Ok(trimmed)
}
