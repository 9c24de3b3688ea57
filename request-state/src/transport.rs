use crate::descriptor::{Method, RequestDescriptor};
use crate::error::FetchError;
use ::utils::surf_logging::SurfLogging;
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use surf::http::headers::{HeaderName, HeaderValue};
use surf::Client;
use tokio_util::sync::CancellationToken;

/// What is handed to the transport for one network call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl From<&RequestDescriptor> for TransportRequest {
    fn from(descriptor: &RequestDescriptor) -> Self {
        Self {
            url: descriptor.url().clone(),
            method: *descriptor.method(),
            headers: descriptor.headers().clone(),
            body: descriptor.body().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests over the network.
///
/// Implementations must give up with [`FetchError::Cancelled`] once `token`
/// is cancelled.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
        token: CancellationToken,
    ) -> Result<TransportResponse, FetchError>;
}

/// Transport backed by a surf client
#[derive(Clone)]
pub struct SurfTransport {
    http: Client,
}

impl Default for SurfTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new().with(SurfLogging))
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    fn build(request: TransportRequest) -> Result<surf::Request, FetchError> {
        let method: surf::http::Method = request
            .method
            .as_ref()
            .parse()
            .map_err(|e: surf::Error| FetchError::Transport(e.to_string()))?;
        let url =
            surf::Url::parse(&request.url).map_err(|e| FetchError::Transport(e.to_string()))?;

        let mut builder = surf::RequestBuilder::new(method, url);
        for (name, value) in &request.headers {
            let name = HeaderName::from_string(name.clone())
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| FetchError::Transport(e.to_string()))?;
            builder = builder.header(name, value);
        }
        // Headers go first so the body does not override an explicit content type
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Transport for SurfTransport {
    async fn send(
        &self,
        request: TransportRequest,
        token: CancellationToken,
    ) -> Result<TransportResponse, FetchError> {
        let request = Self::build(request)?;

        let mut response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            response = self.http.send(request) => {
                response.map_err(|e| FetchError::Transport(e.to_string()))?
            }
        };
        let status = u16::from(response.status());

        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            body = response.body_string() => {
                body.map_err(|e| FetchError::Transport(e.to_string()))?
            }
        };

        Ok(TransportResponse { status, body })
    }
}
