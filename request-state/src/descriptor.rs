use getset::Getters;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};

/// Content type injected when a body is sent without one
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, Display, AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOptionError {
    #[error("Unsupported HTTP method: {0}")]
    Method(String),
    #[error("Request body could not be serialized: {0}")]
    Body(String),
}

/// Options as supplied by the caller, before normalization
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub debounce_ms: u64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::Get.to_string(),
            headers: HashMap::new(),
            body: None,
            debounce_ms: 0,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }
}

/// A normalized request, derived once per logical request
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[get = "pub"]
pub struct RequestDescriptor {
    url: String,
    method: Method,
    headers: HashMap<String, String>,
    body: Option<String>,
    debounce: Duration,
}

impl RequestDescriptor {
    pub fn from_options(
        url: impl Into<String>,
        options: &RequestOptions,
    ) -> Result<Self, InvalidOptionError> {
        let method: Method = options
            .method
            .trim()
            .parse()
            .map_err(|_| InvalidOptionError::Method(options.method.clone()))?;

        // GET never transmits a body
        let body = match (&options.body, method) {
            (_, Method::Get) | (None, _) => None,
            (Some(body), _) => Some(
                serde_json::to_string(body).map_err(|e| InvalidOptionError::Body(e.to_string()))?,
            ),
        };

        let mut headers = options.headers.clone();
        let has_content_type = headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"));
        if body.is_some() && !has_content_type {
            headers.insert("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
        }

        Ok(Self {
            url: url.into(),
            method,
            headers,
            body,
            debounce: Duration::from_millis(options.debounce_ms),
        })
    }

    /// Only GET requests consult or populate the cache and the in-flight registry
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::Get
    }

    /// Digest of everything that identifies this request's inputs
    pub fn identity_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hasher.update(self.method.as_ref().as_bytes());

        let mut headers: Vec<_> = self.headers.iter().collect();
        headers.sort();
        hasher.update(format!("{:?}", headers).as_bytes());

        if let Some(body) = &self.body {
            hasher.update(body.as_bytes());
        }
        hasher.update(self.debounce.as_millis().to_le_bytes());

        hex::encode(hasher.finalize())
    }
}
