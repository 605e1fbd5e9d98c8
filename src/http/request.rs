//! Outbound request definition
//!
//! A `Request` is a plain value: it moves by ownership from the generator to
//! the scheduler, into a fetch task, and finally into the `Response` or
//! `FetchFailure` handed to a callback. The only mutation after creation is
//! `retry()`, applied by the fetcher that currently owns the request.

use crate::crawler::{Callback, ErrorCallback};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
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

impl Method {
    /// Returns the canonical upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Body {
    /// Raw text body, sent as-is
    Text(String),
    /// URL-encoded form fields
    Form(BTreeMap<String, String>),
    /// JSON document
    Json(serde_json::Value),
}

impl Body {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Form(_) => "form",
            Self::Json(_) => "json",
        }
    }

    /// Stable textual form used for fingerprinting
    fn canonical(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Form(fields) => fields
                .iter()
                .map(|(k, v)| format!("{}:{}:{}={}", k.len(), k, v.len(), v))
                .collect::<Vec<_>>()
                .join("&"),
            Self::Json(value) => value.to_string(),
        }
    }
}

/// Proxy settings for a single request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    /// Proxy URL, e.g. `http://10.0.0.1:3128`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// A request waiting to be fetched
#[derive(Clone, Serialize, Deserialize)]
pub struct Request {
    url: String,
    method: Method,
    priority: i64,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    body: Option<Body>,
    cookies: BTreeMap<String, String>,
    proxy: Option<Proxy>,
    #[serde(serialize_with = "serialize_callback_name", skip_deserializing)]
    callback: Option<Callback>,
    #[serde(serialize_with = "serialize_error_callback_name", skip_deserializing)]
    error_callback: Option<ErrorCallback>,
    retry_count: u32,
    meta: BTreeMap<String, serde_json::Value>,
}

impl Request {
    /// Creates a request with the given method and URL, priority 0
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            priority: 0,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            cookies: BTreeMap::new(),
            proxy: None,
            callback: None,
            error_callback: None,
            retry_count: 0,
            meta: BTreeMap::new(),
        }
    }

    /// Creates a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Creates a POST request
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Sets the callback invoked with the response (defaults to `Spider::parse`)
    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Sets the callback invoked when the fetch finally fails
    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    pub fn error_callback(&self) -> Option<&ErrorCallback> {
        self.error_callback.as_ref()
    }

    pub fn meta(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.meta
    }

    /// Number of times a fetcher has retried this request
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Records one more fetch attempt
    pub fn retry(&mut self) {
        self.retry_count += 1;
    }

    /// Computes the request fingerprint
    ///
    /// Hex-encoded SHA-256 over method, URL, headers, params and body. Maps
    /// are ordered, so two requests built from the same inputs always share
    /// a fingerprint regardless of insertion order. Priority, callbacks,
    /// retry count and meta are not part of the identity.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();

        // Every part is length-prefixed so adjacent parts cannot run together
        let mut field = |part: &str| {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        };

        field(self.method.as_str());
        field(&self.url);
        for (name, value) in &self.headers {
            field("h");
            field(name);
            field(value);
        }
        for (name, value) in &self.params {
            field("p");
            field(name);
            field(value);
        }
        if let Some(body) = &self.body {
            field("b");
            field(body.kind());
            field(&body.canonical());
        }

        hex::encode(hasher.finalize())
    }

    /// Serializes the request for external state mirroring
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("\"{}\"", self))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("callback", &self.callback.as_ref().map(|c| c.name()))
            .field(
                "error_callback",
                &self.error_callback.as_ref().map(|c| c.name()),
            )
            .finish()
    }
}

fn serialize_callback_name<S: Serializer>(
    callback: &Option<Callback>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    callback.as_ref().map(|c| c.name()).serialize(serializer)
}

fn serialize_error_callback_name<S: Serializer>(
    callback: &Option<ErrorCallback>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    callback.as_ref().map(|c| c.name()).serialize(serializer)
}
