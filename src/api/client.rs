//! Shared request client: every call produces exactly one response
//! envelope, under per-attempt timeouts and classified retry with
//! exponential backoff.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::config::{Body, ClientConfig, RequestConfig};

use super::error::{RawFailure, classify};
use super::response::{ApiResponse, error_message, normalize};

const USER_AGENT: &str = "aegis-client";

/// Failure message for calls issued without a network transport.
const DETACHED_ERROR: &str =
    "No network transport is available in this execution context";

/// How requests leave the process. `Detached` exists for execution contexts
/// with no usable network runtime; calls on a detached client fail fast
/// instead of attempting I/O.
#[derive(Clone)]
enum Transport {
    Http(reqwest::Client),
    Detached,
}

/// Client for the Aegis backend API.
///
/// Cloning is cheap; clones share the access token and the response cache.
/// The base URL is fixed at construction, the token is replaceable at any
/// time through [`set_access_token`](Self::set_access_token).
#[derive(Clone)]
pub struct ApiClient {
    transport: Transport,
    base_url: String,
    access_token: Arc<RwLock<Option<String>>>,
    cache: Arc<ResponseCache>,
}

impl ApiClient {
    /// Build a client for the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_transport(Transport::Http(client), config))
    }

    /// Build a client from the environment (`AEGIS_API_URL`,
    /// `AEGIS_API_TOKEN`), falling back to the local development URL.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Build a client without a network transport, for execution contexts
    /// where network I/O is unavailable. Every call fails immediately with
    /// a non-retryable failure envelope.
    pub fn detached(config: ClientConfig) -> Self {
        Self::with_transport(Transport::Detached, config)
    }

    fn with_transport(transport: Transport, config: ClientConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: Arc::new(RwLock::new(config.access_token)),
            cache: Arc::new(ResponseCache::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the token used for subsequent requests; `None` removes it.
    /// In-flight requests keep whichever token was current when their
    /// headers were built.
    pub fn set_access_token(&self, token: Option<&str>) {
        let mut slot = self.access_token.write().unwrap_or_else(|e| e.into_inner());
        *slot = token.map(str::to_string);
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[tracing::instrument(skip(self, config))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        config: Option<RequestConfig>,
    ) -> ApiResponse<T> {
        self.request(Method::GET, path, None, config).await
    }

    #[tracing::instrument(skip(self, body, config))]
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Body>,
        config: Option<RequestConfig>,
    ) -> ApiResponse<T> {
        self.request(Method::POST, path, body, config).await
    }

    #[tracing::instrument(skip(self, body, config))]
    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Body>,
        config: Option<RequestConfig>,
    ) -> ApiResponse<T> {
        self.request(Method::PUT, path, body, config).await
    }

    #[tracing::instrument(skip(self, body, config))]
    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Body>,
        config: Option<RequestConfig>,
    ) -> ApiResponse<T> {
        self.request(Method::PATCH, path, body, config).await
    }

    #[tracing::instrument(skip(self, config))]
    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        config: Option<RequestConfig>,
    ) -> ApiResponse<T> {
        self.request(Method::DELETE, path, None, config).await
    }

    /// Turn one `(method, path, body, config)` tuple into exactly one
    /// envelope. Consults the cache first when asked to, then drives the
    /// retry loop; the only side effect is the optional cache write-back.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
        config: Option<RequestConfig>,
    ) -> ApiResponse<T> {
        let config = config.unwrap_or_default();
        let url = self.url_for(path);

        let client = match &self.transport {
            Transport::Http(client) => client.clone(),
            Transport::Detached => {
                debug!("{} {}: refusing to issue network I/O without a transport", method, url);
                return ApiResponse::err(DETACHED_ERROR);
            }
        };

        let cache_key = if config.use_cache {
            config.cache_key.clone()
        } else {
            None
        };

        if let Some(key) = cache_key.as_deref()
            && let Some(payload) = self.cache.get(key)
        {
            match serde_json::from_value::<T>(payload) {
                Ok(data) => {
                    debug!("{} {}: cache hit for '{}'", method, url, key);
                    return ApiResponse::ok(data);
                }
                Err(_) => {
                    // The stored payload no longer matches the requested
                    // type; take the network path and let the write-back
                    // replace it.
                    debug!("{} {}: cache entry '{}' has a stale shape, refetching", method, url, key);
                }
            }
        }

        let envelope = self
            .execute(&client, method, &url, body.as_ref(), &config)
            .await;

        if envelope.success
            && let Some(key) = cache_key.as_deref()
            && let Some(data) = &envelope.data
        {
            self.cache.set(key, data.clone(), config.cache_ttl);
        }

        into_typed(envelope)
    }

    /// Retry loop: reissue the identical request on retryable failures
    /// until one succeeds, a non-retryable failure is classified, or the
    /// retry budget is spent. Retries within one logical call are strictly
    /// sequential.
    async fn execute(
        &self,
        client: &reqwest::Client,
        method: Method,
        url: &str,
        body: Option<&Body>,
        config: &RequestConfig,
    ) -> ApiResponse<Value> {
        let max_retries = if config.enable_retry {
            config.max_retries
        } else {
            0
        };
        let mut retries_used: u32 = 0;

        loop {
            match self
                .attempt(client, method.clone(), url, body, config)
                .await
            {
                Ok(envelope) => return envelope,
                Err(failure) => {
                    let classified = classify(&failure);

                    if !classified.retryable || retries_used >= max_retries {
                        if classified.retryable && max_retries > 0 {
                            warn!(
                                "{} {}: giving up after {} attempts: {}",
                                method,
                                url,
                                retries_used + 1,
                                classified
                            );
                        } else {
                            debug!("{} {}: {} (not retried)", method, url, classified);
                        }
                        return ApiResponse::err(classified.message);
                    }

                    let delay = backoff_delay(config.retry_delay, retries_used);
                    warn!(
                        "{} {}: attempt {}/{} failed ({}), retrying in {:?}...",
                        method,
                        url,
                        retries_used + 1,
                        max_retries + 1,
                        classified,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retries_used += 1;
                }
            }
        }
    }

    /// One network attempt, bounded by the per-attempt deadline.
    async fn attempt(
        &self,
        client: &reqwest::Client,
        method: Method,
        url: &str,
        body: Option<&Body>,
        config: &RequestConfig,
    ) -> Result<ApiResponse<Value>, RawFailure> {
        let request = self.build_request(client, method, url, body, config);

        match tokio::time::timeout(config.timeout, send_and_normalize(request, config)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RawFailure::DeadlineElapsed(config.timeout)),
        }
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        method: Method,
        url: &str,
        body: Option<&Body>,
        config: &RequestConfig,
    ) -> reqwest::RequestBuilder {
        let mut request = client.request(method, url);

        if let Some(token) = self.access_token() {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request = request.header(AUTHORIZATION, value);
                }
                Err(_) => {
                    warn!("Access token is not a valid header value, omitting Authorization");
                }
            }
        }

        if !config.headers.is_empty() {
            request = request.headers(config.headers.clone());
        }

        match body {
            Some(Body::Json(value)) => request = request.json(value),
            Some(Body::Raw {
                bytes,
                content_type,
            }) => {
                if let Some(content_type) = content_type {
                    request = request.header(CONTENT_TYPE, content_type.as_str());
                }
                request = request.body(bytes.clone());
            }
            None => {}
        }

        request
    }

    /// Join the base URL and an endpoint path with exactly one slash.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// Send the request and fold the response into an envelope over raw JSON.
async fn send_and_normalize(
    request: reqwest::RequestBuilder,
    config: &RequestConfig,
) -> Result<ApiResponse<Value>, RawFailure> {
    let response = request.send().await.map_err(RawFailure::Transport)?;
    let status = response.status();
    let text = response.text().await.map_err(RawFailure::Transport)?;

    if !status.is_success() {
        return Err(RawFailure::Status {
            status: status.as_u16(),
            message: error_message(&text),
        });
    }

    if text.trim().is_empty() {
        // Bodyless success (204-style): callers see a null payload rather
        // than a decode failure.
        return Ok(normalize(Value::Null, config.detect_envelope));
    }

    let value: Value = serde_json::from_str(&text).map_err(RawFailure::Decode)?;
    Ok(normalize(value, config.detect_envelope))
}

/// Convert the raw-JSON envelope into the caller's type. A payload that no
/// longer matches `T` is a deterministic mismatch, surfaced without retry.
fn into_typed<T: DeserializeOwned>(envelope: ApiResponse<Value>) -> ApiResponse<T> {
    let ApiResponse {
        success,
        data,
        error,
    } = envelope;

    match (success, data) {
        (true, Some(value)) => match serde_json::from_value(value) {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::err(format!("Failed to decode response payload: {e}")),
        },
        (true, None) => ApiResponse {
            success: true,
            data: None,
            error,
        },
        (false, _) => ApiResponse {
            success: false,
            data: None,
            error,
        },
    }
}

/// Exponential backoff: `base * 2^n`, where `n` is 0 for the first retry.
fn backoff_delay(base: Duration, attempt_index: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt_index))
}
