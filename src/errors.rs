use std::time::Duration;

use thiserror::Error;

use crate::models::JobError;

/// All errors that can occur when using the Bria Engine SDK.
#[derive(Error, Debug)]
pub enum BriaError {
    /// The server answered with a non-2xx status.
    ///
    /// `body` holds the parsed JSON body, or the raw text as a JSON string
    /// when the body was not JSON.
    #[error("request to {url} failed with HTTP {status}")]
    Transport {
        url: String,
        base_url: String,
        status: u16,
        body: Option<serde_json::Value>,
    },

    /// The request never produced a response (connect failure, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        base_url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The job itself reported an error.
    #[error(transparent)]
    Job(#[from] JobError),

    /// A moderated request was rejected by content moderation (HTTP 422).
    #[error("content moderation rejected the request: {0}")]
    ContentModeration(JobError),

    /// Polling did not reach a terminal status within the allowed time.
    #[error("job {request_id} did not finish within {timeout:?} (elapsed {elapsed:?})")]
    Timeout {
        request_id: String,
        timeout: Duration,
        elapsed: Duration,
    },

    /// A result file exists but has no content (empty 200/206, or 416).
    #[error("file at {url} is empty (HTTP {status})")]
    EmptyFile { url: String, status: u16 },

    /// A result file did not become downloadable within the allowed time.
    #[error("file at {url} was not ready within {timeout:?} (elapsed {elapsed:?})")]
    FileTimeout {
        url: String,
        timeout: Duration,
        elapsed: Duration,
    },

    /// Neither the engine nor the call supplied a credential.
    #[error(
        "missing authentication: configure a credential on the engine, set BRIA_API_TOKEN, \
         or pass one per call"
    )]
    MissingAuthentication,

    /// The payload cannot be sent as-is.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A poll or status call was made without a usable request id.
    #[error("request_id is required")]
    InvalidRequestId,

    /// Extra headers tried to set a credential header.
    #[error("header `{0}` carries credentials; pass the token through CallOptions instead")]
    ReservedHeader(String),

    /// A header name or value is not valid HTTP.
    #[error("invalid header `{name}`")]
    InvalidHeader { name: String },

    /// A 2xx body could not be decoded into a job response.
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The engine configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The blocking engine was called on a thread that is driving a tokio runtime.
    #[error("SyncEngine cannot be used inside an async runtime; use AsyncEngine instead")]
    BlockingInAsyncContext,

    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl BriaError {
    /// HTTP status of a [`BriaError::Transport`] error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } | Self::EmptyFile { status, .. } => Some(*status),
            Self::Network { source, .. } => source.status().map(|s| s.as_u16()),
            Self::ContentModeration(err) => u16::try_from(err.code).ok(),
            _ => None,
        }
    }

    /// The URL of the request that failed, for transport-level and file errors.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Transport { url, .. }
            | Self::Network { url, .. }
            | Self::Decode { url, .. }
            | Self::EmptyFile { url, .. }
            | Self::FileTimeout { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, BriaError>`.
pub type Result<T> = std::result::Result<T, BriaError>;
