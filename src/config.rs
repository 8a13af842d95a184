//! Client construction and per-request configuration.

use std::env;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;

/// Environment variable naming the backend base URL.
pub const API_URL_ENV: &str = "AEGIS_API_URL";

/// Environment variable holding an access token picked up at construction.
pub const API_TOKEN_ENV: &str = "AEGIS_API_TOKEN";

/// Base URL used when the environment does not provide one.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Maximum number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay before the first retry; doubled for each subsequent retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Deadline applied to each individual attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-wide client settings. The base URL is fixed at construction;
/// the access token can later be replaced through
/// [`ApiClient::set_access_token`](crate::ApiClient::set_access_token).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub access_token: Option<String>,
}

impl ClientConfig {
    /// Configuration pointing at an explicit base URL, with no token.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
        }
    }

    /// Resolve the base URL from `AEGIS_API_URL` (falling back to the local
    /// development server) and pick up `AEGIS_API_TOKEN` when set.
    pub fn from_env() -> Self {
        Self {
            base_url: env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            access_token: env::var(API_TOKEN_ENV).ok(),
        }
    }

    /// Attach an initial access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Per-call options. A logical call keeps its configuration for all of its
/// retries; nothing here is mutated by the executor.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Retry retryable failures at all.
    pub enable_retry: bool,
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Base backoff delay; retry `n` (0-based) waits `retry_delay * 2^n`.
    pub retry_delay: Duration,
    /// Deadline for each attempt, covering send and body read.
    pub timeout: Duration,
    /// Consult the cache before the network and populate it on success.
    /// Only effective together with `cache_key`.
    pub use_cache: bool,
    /// Caller-chosen cache key; never derived from the request itself.
    pub cache_key: Option<String>,
    /// Entry lifetime for the write-back; the cache default applies when
    /// unset.
    pub cache_ttl: Option<Duration>,
    /// Pass a parsed 2xx body through unchanged when it already carries a
    /// `success` key. A genuine payload with its own `success` field is
    /// indistinguishable from an enveloped response; disable this to always
    /// wrap the body instead.
    pub detect_envelope: bool,
    /// Extra headers applied to this call only.
    pub headers: HeaderMap,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            enable_retry: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            use_cache: false,
            cache_key: None,
            cache_ttl: None,
            detect_envelope: true,
            headers: HeaderMap::new(),
        }
    }
}

impl RequestConfig {
    /// Defaults plus caching under the given key.
    pub fn cached(key: impl Into<String>) -> Self {
        Self {
            use_cache: true,
            cache_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Defaults with the retry loop disabled.
    pub fn without_retry() -> Self {
        Self {
            enable_retry: false,
            ..Self::default()
        }
    }
}

/// Request payload. JSON bodies are serialized and carry the JSON content
/// type; raw bodies pass through unmodified with whatever content type the
/// caller supplies.
#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Raw {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

impl Body {
    /// Serialize any `Serialize` payload into a JSON body.
    pub fn json<S: Serialize>(payload: &S) -> serde_json::Result<Self> {
        Ok(Self::Json(serde_json::to_value(payload)?))
    }

    /// A binary payload sent as-is.
    pub fn raw(bytes: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        Self::Raw {
            bytes: bytes.into(),
            content_type: content_type.map(str::to_string),
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}
