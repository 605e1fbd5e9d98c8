//! HTTP transport built on reqwest
//!
//! Sends exactly one attempt per call. Retries live in `RetryingFetcher`.

use crate::config::FetcherConfig;
use crate::crawler::fetcher::{FailureReason, Transport};
use crate::http::{Body, Method, Proxy, Request, ResponseParts};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while setting up a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    #[error("invalid proxy '{0}'")]
    InvalidProxy(String),

    #[error("fetcher '{name}' failed to open: {message}")]
    Open { name: String, message: String },
}

/// Builds an HTTP client from the fetcher configuration
///
/// # Arguments
///
/// * `config` - Fetcher settings (user agent, timeout, TLS verification)
/// * `proxy` - Optional proxy every request of this client goes through
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(TransportError)` - Failed to build client
pub fn build_http_client(
    config: &FetcherConfig,
    proxy: Option<&Proxy>,
) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .danger_accept_invalid_certs(!config.verify_ssl)
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        let mut settings = reqwest::Proxy::all(proxy.url.as_str())
            .map_err(|_| TransportError::InvalidProxy(proxy.url.clone()))?;
        if let Some(username) = &proxy.username {
            settings = settings.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
        }
        builder = builder.proxy(settings);
    }

    Ok(builder.build()?)
}

/// Single-attempt reqwest transport
///
/// Requests with a proxy get a dedicated client, cached per proxy.
pub struct HttpTransport {
    config: FetcherConfig,
    client: Client,
    proxied: Mutex<HashMap<Proxy, Client>>,
}

impl HttpTransport {
    pub fn new(config: FetcherConfig) -> Result<Self, TransportError> {
        let client = build_http_client(&config, None)?;
        Ok(Self {
            config,
            client,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, request: &Request) -> Result<Client, FailureReason> {
        let Some(proxy) = request.proxy() else {
            return Ok(self.client.clone());
        };

        let mut cache = self.proxied.lock();
        if let Some(client) = cache.get(proxy) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.config, Some(proxy))
            .map_err(|e| FailureReason::InvalidRequest(e.to_string()))?;
        cache.insert(proxy.clone(), client.clone());
        Ok(client)
    }

    fn build(&self, client: &Client, request: &Request) -> reqwest::RequestBuilder {
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        };

        let mut builder = client.request(method, request.url());

        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !request.params().is_empty() {
            builder = builder.query(request.params());
        }

        if !request.cookies().is_empty() {
            let cookie = request
                .cookies()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }

        match request.body() {
            Some(Body::Text(text)) => builder.body(text.clone()),
            Some(Body::Form(fields)) => builder.form(fields),
            Some(Body::Json(value)) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(value.to_string()),
            None => builder,
        }
    }
}

/// Maps a reqwest error onto a failure reason
fn classify(error: reqwest::Error) -> FailureReason {
    if error.is_timeout() {
        FailureReason::Timeout
    } else if error.is_connect() {
        FailureReason::Connect(error.to_string())
    } else if error.is_builder() {
        FailureReason::InvalidRequest(error.to_string())
    } else {
        FailureReason::Transport(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &Request) -> Result<ResponseParts, FailureReason> {
        let client = self.client_for(request)?;
        let response = self.build(&client, request).send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(ResponseParts {
            status,
            url,
            headers,
            body,
        })
    }
}
