//! Relays approved uploads to the downstream CMS.

use crate::config::DownstreamConfig;
use crate::scanner::ScanInput;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

/// Response from the downstream API, relayed to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Error from forwarding an upload.
#[derive(Debug)]
pub enum ForwardError {
    /// Downstream URL could not be parsed.
    InvalidUrl(String),
    /// Request could not be assembled.
    Build(String),
    /// Downstream unreachable or the exchange broke off.
    Connection(String),
    /// Downstream did not answer in time.
    Timeout,
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::InvalidUrl(url) => write!(f, "Invalid downstream URL: {}", url),
            ForwardError::Build(msg) => write!(f, "Failed to build request: {}", msg),
            ForwardError::Connection(msg) => write!(f, "Downstream request failed: {}", msg),
            ForwardError::Timeout => write!(f, "Downstream request timed out"),
        }
    }
}

impl std::error::Error for ForwardError {}

impl From<reqwest::Error> for ForwardError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ForwardError::Timeout
        } else if e.is_builder() {
            ForwardError::Build(e.to_string())
        } else {
            ForwardError::Connection(e.to_string())
        }
    }
}

/// Something that can take an approved upload off the gateway's hands.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send the file downstream, passing the caller's `Authorization` along.
    async fn forward(
        &self,
        input: ScanInput,
        authorization: Option<&str>,
    ) -> Result<DownstreamResponse, ForwardError>;
}

/// Forwarder posting `multipart/form-data` to the CMS upload endpoint.
pub struct CmsForwarder {
    client: reqwest::Client,
    upload_url: reqwest::Url,
    field_name: String,
    timeout: Duration,
}

impl CmsForwarder {
    /// Create a forwarder for the configured downstream.
    pub fn new(config: &DownstreamConfig, field_name: &str) -> Result<Self, ForwardError> {
        let url = config.upload_url();
        let upload_url = reqwest::Url::parse(&url).map_err(|_| ForwardError::InvalidUrl(url))?;
        let timeout = Duration::from_millis(config.timeout_ms);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Build(e.to_string()))?;

        Ok(Self {
            client,
            upload_url,
            field_name: field_name.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl Forwarder for CmsForwarder {
    async fn forward(
        &self,
        input: ScanInput,
        authorization: Option<&str>,
    ) -> Result<DownstreamResponse, ForwardError> {
        debug!(
            url = %self.upload_url,
            filename = %input.filename,
            size = input.data.len(),
            timeout_ms = self.timeout.as_millis(),
            "Forwarding upload"
        );

        let part = Part::bytes(input.data)
            .file_name(input.filename)
            .mime_str("application/pdf")
            .map_err(|e| ForwardError::Build(e.to_string()))?;
        let form = Form::new().part(self.field_name.clone(), part);

        let mut request = self.client.post(self.upload_url.clone()).multipart(form);
        if let Some(auth) = authorization {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().await?.to_vec();

        debug!(status, body_size = body.len(), "Downstream response");

        Ok(DownstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
