//! HTTP transport seam.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use maestro_kernel::{NetworkErrorKind, OrchestratorError, OrchestratorResult};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub timeout: Duration,
}

/// Any status is a valid response here; status handling is the caller's job.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON, or the raw text as a JSON string
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `request.body` as JSON.
    async fn post_json(&self, request: HttpRequest) -> OrchestratorResult<HttpResponse>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn network_error(err: &reqwest::Error) -> OrchestratorError {
    let mut kind = None;
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            kind = match io.kind() {
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    Some(NetworkErrorKind::ConnectionReset)
                }
                std::io::ErrorKind::ConnectionRefused => Some(NetworkErrorKind::ConnectionRefused),
                std::io::ErrorKind::TimedOut => Some(NetworkErrorKind::TimedOut),
                _ => None,
            };
            if kind.is_some() {
                break;
            }
        }
        source = cause.source();
    }

    let kind = kind.unwrap_or(if err.is_timeout() {
        NetworkErrorKind::TimedOut
    } else if err.is_connect() {
        NetworkErrorKind::ConnectionRefused
    } else {
        NetworkErrorKind::Other
    });

    OrchestratorError::Network {
        kind,
        message: err.to_string(),
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, request: HttpRequest) -> OrchestratorResult<HttpResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| network_error(&e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| network_error(&e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(HttpResponse { status, body })
    }
}
