//! Credential handling and per-call header assembly.
//!
//! Every request gets its headers from [`assemble_headers`], which reads the
//! engine configuration and the call's own [`CredentialOverride`] and returns a
//! fresh map. Nothing here writes to the engine, so concurrent calls with
//! different overrides cannot observe each other's tokens.

use std::fmt;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::EngineConfig;
use crate::errors::{BriaError, Result};

/// Header carrying an API token.
pub const API_TOKEN_HEADER: &str = "api_token";

/// Header carrying a JWT.
pub const JWT_HEADER: &str = "jwt";

/// Marker header sent by engines built with
/// [`EngineBuilder::internal_request`](crate::EngineBuilder::internal_request).
pub const INTERNAL_REQUEST_HEADER: &str = "x-internal-request";

/// Which header a credential travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthChannel {
    #[default]
    ApiToken,
    Jwt,
}

impl AuthChannel {
    pub fn header_name(self) -> &'static str {
        match self {
            Self::ApiToken => API_TOKEN_HEADER,
            Self::Jwt => JWT_HEADER,
        }
    }
}

/// A string value that is either fixed or produced on demand.
///
/// Resolvers run once per request, which lets callers plug in rotating or
/// context-dependent tokens.
#[derive(Clone)]
pub enum Credential {
    Static(String),
    Resolver(Arc<dyn Fn() -> String + Send + Sync>),
}

impl Credential {
    pub fn resolver(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self::Resolver(Arc::new(f))
    }

    /// Current value; blank values count as no credential.
    pub fn resolve(&self) -> Option<String> {
        let value = match self {
            Self::Static(value) => value.clone(),
            Self::Resolver(f) => f(),
        };
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Credential::Static(<redacted>)"),
            Self::Resolver(_) => f.write_str("Credential::Resolver(..)"),
        }
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::Static(value.to_string())
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

/// Default header value: fixed, or computed for every request.
#[derive(Clone)]
pub enum HeaderSource {
    Static(String),
    Computed(Arc<dyn Fn() -> String + Send + Sync>),
}

impl HeaderSource {
    pub fn computed(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    pub fn value(&self) -> String {
        match self {
            Self::Static(value) => value.clone(),
            Self::Computed(f) => f(),
        }
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for HeaderSource {
    fn from(value: &str) -> Self {
        Self::Static(value.to_string())
    }
}

impl From<String> for HeaderSource {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

/// A credential that replaces the engine default for a single call.
#[derive(Debug, Clone)]
pub struct CredentialOverride {
    pub channel: AuthChannel,
    pub credential: Credential,
}

impl CredentialOverride {
    pub fn api_token(credential: impl Into<Credential>) -> Self {
        Self {
            channel: AuthChannel::ApiToken,
            credential: credential.into(),
        }
    }

    pub fn jwt(credential: impl Into<Credential>) -> Self {
        Self {
            channel: AuthChannel::Jwt,
            credential: credential.into(),
        }
    }
}

fn is_credential_header(name: &HeaderName) -> bool {
    name.as_str() == API_TOKEN_HEADER || name.as_str() == JWT_HEADER
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| BriaError::InvalidHeader {
        name: name.to_string(),
    })
}

/// Build the headers for one request.
///
/// Layering, lowest to highest: engine default headers, the credential header
/// (override if given, engine default otherwise), then `extra`. Exactly one
/// credential header is ever present and `extra` may not supply one.
pub(crate) fn assemble_headers(
    config: &EngineConfig,
    credential_override: Option<&CredentialOverride>,
    extra: &HeaderMap,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (name, source) in config.default_headers() {
        if is_credential_header(name) {
            continue;
        }
        headers.insert(name.clone(), header_value(name.as_str(), &source.value())?);
    }

    let (channel, token) = match credential_override {
        Some(o) => (o.channel, o.credential.resolve()),
        None => (
            config.auth_channel(),
            config.credential().and_then(Credential::resolve),
        ),
    };
    let token = token.ok_or(BriaError::MissingAuthentication)?;
    headers.insert(
        HeaderName::from_static(channel.header_name()),
        header_value(channel.header_name(), &token)?,
    );

    for name in extra.keys() {
        if is_credential_header(name) {
            return Err(BriaError::ReservedHeader(name.as_str().to_string()));
        }
        headers.remove(name);
    }
    for (name, value) in extra {
        headers.append(name.clone(), value.clone());
    }

    Ok(headers)
}
