//! Request building shared by [`AsyncEngine`](crate::AsyncEngine) and
//! [`SyncEngine`](crate::SyncEngine).

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::auth::{assemble_headers, Credential, CredentialOverride};
use crate::config::EngineConfig;
use crate::errors::{BriaError, Result};
use crate::models::{JobError, JobResponse};
use crate::transport::TransportResponse;

/// Payload flags that switch on server-side content moderation.
pub const MODERATION_FLAGS: [&str; 3] = [
    "visual_input_content_moderation",
    "visual_output_content_moderation",
    "prompt_content_moderation",
];

/// Per-call settings for `run`, `submit`, `status` and `poll`.
///
/// The credential set here applies to this call only; the engine's default is
/// never modified.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    credential: Option<CredentialOverride>,
    headers: HeaderMap,
    raise_for_status: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `token` in the `api_token` header instead of the engine default.
    pub fn api_token(mut self, token: impl Into<Credential>) -> Self {
        self.credential = Some(CredentialOverride::api_token(token));
        self
    }

    /// Send `token` in the `jwt` header instead of the engine default.
    pub fn jwt(mut self, token: impl Into<Credential>) -> Self {
        self.credential = Some(CredentialOverride::jwt(token));
        self
    }

    /// Add one extra header, layered over the computed headers.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add extra headers, layered over the computed headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Return job failures from `run`/`submit` as [`BriaError::Job`].
    pub fn raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = raise;
        self
    }

    pub fn credential(&self) -> Option<&CredentialOverride> {
        self.credential.as_ref()
    }
}

/// Reclassifies transport errors from `run`/`submit`, given the payload sent.
pub trait ErrorHook: Send + Sync {
    fn classify(&self, error: BriaError, payload: &Value) -> BriaError;
}

impl<F> ErrorHook for F
where
    F: Fn(BriaError, &Value) -> BriaError + Send + Sync,
{
    fn classify(&self, error: BriaError, payload: &Value) -> BriaError {
        self(error, payload)
    }
}

/// Default hook: a 422 on a moderated payload becomes
/// [`BriaError::ContentModeration`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentModerationHook;

impl ContentModerationHook {
    pub fn is_moderated(payload: &Value) -> bool {
        MODERATION_FLAGS
            .iter()
            .any(|flag| payload.get(*flag).and_then(Value::as_bool).unwrap_or(false))
    }
}

impl ErrorHook for ContentModerationHook {
    fn classify(&self, error: BriaError, payload: &Value) -> BriaError {
        match error {
            BriaError::Transport {
                status: 422,
                ref body,
                ..
            } if Self::is_moderated(payload) => {
                BriaError::ContentModeration(JobError::from_http(422, body.as_ref()))
            }
            other => other,
        }
    }
}

/// How the server should execute a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncMode {
    /// The server finishes the job before answering.
    Run,
    /// The server answers with a request id right away.
    Submit,
}

impl SyncMode {
    fn flag(self) -> bool {
        matches!(self, Self::Run)
    }
}

/// Configuration plus the pieces of request handling that do no I/O.
pub(crate) struct EngineCore {
    config: EngineConfig,
    hook: Arc<dyn ErrorHook>,
}

impl EngineCore {
    pub(crate) fn new(config: EngineConfig, hook: Arc<dyn ErrorHook>) -> Self {
        Self { config, hook }
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// `{base_url}/v2/{endpoint}`
    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        let endpoint = endpoint.trim_start_matches('/');
        let endpoint = endpoint.strip_prefix("v2/").unwrap_or(endpoint);
        format!("{}/v2/{}", self.config.base_url(), endpoint)
    }

    /// `{base_url}/v2/status/{request_id}`
    pub(crate) fn status_url(&self, request_id: &str) -> Result<String> {
        let id = request_id.trim();
        if id.is_empty() || id.contains('/') {
            return Err(BriaError::InvalidRequestId);
        }
        Ok(self.endpoint_url(&format!("status/{id}")))
    }

    pub(crate) fn headers(&self, options: &CallOptions) -> Result<HeaderMap> {
        assemble_headers(&self.config, options.credential.as_ref(), &options.headers)
    }

    /// Serialize `payload` and set its `sync` flag.
    ///
    /// The payload must be a JSON object that does not already carry `sync`;
    /// the flag is owned by the choice between `run` and `submit`.
    pub(crate) fn shape_payload<P>(&self, payload: &P, mode: SyncMode) -> Result<Value>
    where
        P: Serialize + ?Sized,
    {
        let mut value = serde_json::to_value(payload)
            .map_err(|e| BriaError::InvalidPayload(format!("payload is not serializable: {e}")))?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| BriaError::InvalidPayload("payload must be a JSON object".into()))?;

        if object.contains_key("sync") {
            let hint = match mode {
                SyncMode::Run => "run() always sends sync=true; use submit() for async jobs",
                SyncMode::Submit => "submit() always sends sync=false; use run() for sync jobs",
            };
            return Err(BriaError::InvalidPayload(format!("`sync` must not be set: {hint}")));
        }

        object.insert("sync".into(), Value::Bool(mode.flag()));
        Ok(value)
    }

    pub(crate) fn classify(&self, error: BriaError, payload: &Value) -> BriaError {
        self.hook.classify(error, payload)
    }

    pub(crate) fn parse(&self, url: &str, response: TransportResponse) -> Result<JobResponse> {
        JobResponse::from_value(response.body).map_err(|source| BriaError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub(crate) fn finish(
        &self,
        response: JobResponse,
        options: &CallOptions,
    ) -> Result<JobResponse> {
        if options.raise_for_status {
            response.raise_for_status()?;
        }
        Ok(response)
    }
}
