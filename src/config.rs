use std::time::Duration;

use reqwest::header::HeaderName;
use reqwest::{Method, StatusCode};

use crate::auth::{AuthChannel, Credential, HeaderSource, INTERNAL_REQUEST_HEADER};
use crate::errors::{BriaError, Result};

/// Production engine URL.
pub const DEFAULT_BASE_URL: &str = "https://engine.prod.bria-api.com";

pub const API_TOKEN_ENV: &str = "BRIA_API_TOKEN";
pub const JWT_ENV: &str = "BRIA_JWT";
pub const BASE_URL_ENV: &str = "BRIA_BASE_URL";
const LEGACY_API_TOKEN_ENV: &str = "BRIA_ENGINE_API_KEY";
const LEGACY_BASE_URL_ENV: &str = "BRIA_ENGINE_URL";

/// When and how the transport retries a request.
///
/// Only methods in `retry_methods` are retried. POST is left out by default
/// because a job submission is not idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff_factor * 2^(n-1)`.
    pub backoff_factor: Duration,
    /// Upper bound for a single backoff delay.
    pub max_backoff: Duration,
    pub retry_statuses: Vec<u16>,
    pub retry_methods: Vec<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            // initial try plus three retries
            max_attempts: 4,
            backoff_factor: Duration::from_secs(2),
            max_backoff: Duration::from_secs(120),
            retry_statuses: vec![429, 500, 502, 503, 504],
            retry_methods: vec![Method::GET, Method::PUT, Method::DELETE],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn backoff_factor(mut self, factor: Duration) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    pub fn retry_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retry_methods = methods.into_iter().collect();
        self
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.retry_methods.contains(method)
    }

    pub fn retries_status(&self, method: &Method, status: StatusCode) -> bool {
        self.allows_method(method) && self.retry_statuses.contains(&status.as_u16())
    }

    pub fn retries_error(&self, method: &Method, err: &reqwest::Error) -> bool {
        self.allows_method(method) && (err.is_timeout() || err.is_connect())
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.backoff_factor
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// HTTP client timeouts and pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Whole request, from send to the last body byte.
    pub request: Duration,
    pub pool_idle: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
            pool_idle: Duration::from_secs(30),
            pool_max_idle_per_host: 20,
        }
    }
}

/// Resolved engine settings. Built by [`EngineBuilder`] and read-only afterwards.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    base_url: String,
    auth_channel: AuthChannel,
    credential: Option<Credential>,
    default_headers: Vec<(HeaderName, HeaderSource)>,
    retry: RetryPolicy,
    timeouts: Timeouts,
}

impl EngineConfig {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Load `.env` if present, then read the process environment.
    ///
    /// # Environment variables
    /// - `BRIA_API_TOKEN` (or `BRIA_ENGINE_API_KEY`): API token
    /// - `BRIA_JWT`: JWT, used when no API token is set
    /// - `BRIA_BASE_URL` (or `BRIA_ENGINE_URL`): engine base URL
    ///
    /// A missing credential is not an error here; calls must then pass one.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = EngineBuilder::new();
        if let Some(url) = get(BASE_URL_ENV).or_else(|| get(LEGACY_BASE_URL_ENV)) {
            builder = builder.base_url(url);
        }

        if let Some(token) = get(API_TOKEN_ENV).or_else(|| get(LEGACY_API_TOKEN_ENV)) {
            builder = builder.api_token(token);
        } else if let Some(jwt) = get(JWT_ENV) {
            builder = builder.jwt(jwt);
        } else {
            tracing::debug!("no credential in environment; calls must supply one");
        }

        let config = builder.build()?;
        tracing::info!(base_url = %config.base_url, "engine configuration loaded from env");
        Ok(config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth_channel(&self) -> AuthChannel {
        self.auth_channel
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn default_headers(&self) -> &[(HeaderName, HeaderSource)] {
        &self.default_headers
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }
}

/// Builder for [`EngineConfig`].
///
/// # Example
///
/// ```no_run
/// use bria_engine::{AsyncEngine, EngineBuilder, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> bria_engine::Result<()> {
/// let config = EngineBuilder::new()
///     .api_token("bria_token")
///     .base_url("https://engine.prod.bria-api.com")
///     .retry(RetryPolicy::default().max_attempts(5))
///     .request_timeout(Duration::from_secs(120))
///     .build()?;
/// let engine = AsyncEngine::new(config);
/// # Ok(())
/// # }
/// ```
pub struct EngineBuilder {
    base_url: String,
    auth_channel: AuthChannel,
    credential: Option<Credential>,
    default_headers: Vec<(String, HeaderSource)>,
    retry: RetryPolicy,
    timeouts: Timeouts,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_channel: AuthChannel::ApiToken,
            credential: None,
            default_headers: Vec::new(),
            retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Override the base URL (defaults to [`DEFAULT_BASE_URL`]).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Authenticate with an `api_token` header.
    pub fn api_token(mut self, token: impl Into<Credential>) -> Self {
        self.auth_channel = AuthChannel::ApiToken;
        self.credential = Some(token.into());
        self
    }

    /// Authenticate with a `jwt` header instead of an API token.
    pub fn jwt(mut self, token: impl Into<Credential>) -> Self {
        self.auth_channel = AuthChannel::Jwt;
        self.credential = Some(token.into());
        self
    }

    /// Set an API-token credential, static or resolved per request.
    pub fn credential(self, credential: Credential) -> Self {
        self.api_token(credential)
    }

    /// Add a header sent with every request.
    pub fn default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<HeaderSource>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Mark every request as internal traffic.
    pub fn internal_request(self) -> Self {
        self.default_header(INTERNAL_REQUEST_HEADER, "true")
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the per-request HTTP timeout (defaults to 30 seconds).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request = timeout;
        self
    }

    /// Build the [`EngineConfig`].
    ///
    /// Returns [`BriaError::Config`] if the base URL is not an http(s) URL and
    /// [`BriaError::InvalidHeader`] if a default header name is not valid.
    pub fn build(self) -> Result<EngineConfig> {
        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BriaError::Config(format!(
                "base URL must start with http:// or https://, got `{base_url}`"
            )));
        }

        let default_headers = self
            .default_headers
            .into_iter()
            .map(|(name, source)| {
                HeaderName::from_bytes(name.as_bytes())
                    .map(|parsed| (parsed, source))
                    .map_err(|_| BriaError::InvalidHeader { name })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(EngineConfig {
            base_url,
            auth_channel: self.auth_channel,
            credential: self.credential,
            default_headers,
            retry: self.retry,
            timeouts: self.timeouts,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
