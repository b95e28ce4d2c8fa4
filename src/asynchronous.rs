use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine::{CallOptions, ContentModerationHook, EngineCore, ErrorHook, SyncMode};
use crate::errors::Result;
use crate::models::{JobResponse, JobStatus, PollTarget};
use crate::poller::{poll_async, wait_for_file_async, FileWaitOptions, PollOptions};
use crate::transport::AsyncTransport;

struct Inner {
    core: EngineCore,
    transport: AsyncTransport,
}

/// The asynchronous Bria Engine client.
///
/// Cloning is cheap and clones share connection pools. All methods take
/// `&self`; per-call credentials travel in [`CallOptions`], so one engine can
/// serve many concurrent tasks with different tokens.
///
/// # Example
///
/// ```no_run
/// use bria_engine::{AsyncEngine, CallOptions, EngineBuilder, PollOptions};
/// use serde_json::json;
///
/// # async fn example() -> bria_engine::Result<()> {
/// let engine = AsyncEngine::new(EngineBuilder::new().api_token("bria_token").build()?);
///
/// let submitted = engine
///     .submit(
///         "image/edit/remove_background",
///         &json!({"image": "https://example.com/in.png"}),
///         &CallOptions::new(),
///     )
///     .await?;
/// let done = engine
///     .poll(&submitted, &PollOptions::default(), &CallOptions::new())
///     .await?;
/// println!("{:?}", done.result().and_then(|r| r.get_str("image_url")));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncEngine {
    inner: Arc<Inner>,
}

impl AsyncEngine {
    /// Create an engine with the default content-moderation error hook.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_error_hook(config, ContentModerationHook)
    }

    /// Create an engine with a custom [`ErrorHook`].
    pub fn with_error_hook(config: EngineConfig, hook: impl ErrorHook + 'static) -> Self {
        let transport = AsyncTransport::new(&config);
        Self {
            inner: Arc::new(Inner {
                core: EngineCore::new(config, Arc::new(hook)),
                transport,
            }),
        }
    }

    /// Build from environment variables; see [`EngineConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    pub fn config(&self) -> &EngineConfig {
        self.inner.core.config()
    }

    /// Submit a job and let the server finish it before answering (`sync: true`).
    ///
    /// # Errors
    ///
    /// - [`BriaError::InvalidPayload`](crate::BriaError::InvalidPayload) if the
    ///   payload is not an object or already sets `sync`.
    /// - [`BriaError::MissingAuthentication`](crate::BriaError::MissingAuthentication)
    ///   if no credential is available.
    /// - Transport errors, after the [`ErrorHook`] has seen them.
    pub async fn run<P>(
        &self,
        endpoint: &str,
        payload: &P,
        options: &CallOptions,
    ) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        self.post(endpoint, payload, SyncMode::Run, options).await
    }

    /// Submit a job and return as soon as the server accepts it (`sync: false`).
    ///
    /// The returned response is usually still running; pass it to
    /// [`poll`](Self::poll).
    pub async fn submit<P>(
        &self,
        endpoint: &str,
        payload: &P,
        options: &CallOptions,
    ) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        self.post(endpoint, payload, SyncMode::Submit, options).await
    }

    /// Current status of a job.
    pub async fn status(&self, request_id: &str, options: &CallOptions) -> Result<JobStatus> {
        Ok(self.status_response(request_id, options).await?.status())
    }

    /// Current snapshot of a job.
    pub async fn status_response(
        &self,
        request_id: &str,
        options: &CallOptions,
    ) -> Result<JobResponse> {
        let core = &self.inner.core;
        let url = core.status_url(request_id)?;
        let headers = core.headers(options)?;
        let response = self
            .inner
            .transport
            .request(Method::GET, &url, None, headers)
            .await?;
        core.parse(&url, response)
    }

    /// Poll until the job completes or fails, or `poll.timeout` runs out.
    ///
    /// The timeout also cuts off a status call that is still in flight.
    pub async fn poll(
        &self,
        target: impl Into<PollTarget>,
        poll: &PollOptions,
        options: &CallOptions,
    ) -> Result<JobResponse> {
        let target = target.into();
        let request_id = target.request_id()?;
        poll_async(request_id, poll, || self.status_response(request_id, options)).await
    }

    /// Wait until a result file can be downloaded.
    ///
    /// Result URLs can be announced before the file is written. This sends
    /// `Range: bytes=0-0` requests, without credentials, every
    /// `options.interval` until the file has content.
    ///
    /// # Errors
    ///
    /// - [`BriaError::EmptyFile`](crate::BriaError::EmptyFile) if the file
    ///   exists but is empty.
    /// - [`BriaError::FileTimeout`](crate::BriaError::FileTimeout) when
    ///   `options.timeout` runs out, even in the middle of a check.
    pub async fn wait_for_file(&self, url: &str, options: &FileWaitOptions) -> Result<()> {
        let transport = &self.inner.transport;
        wait_for_file_async(url, options, || transport.check_file(url)).await
    }

    /// [`submit`](Self::submit) followed by [`poll`](Self::poll).
    pub async fn submit_and_poll<P>(
        &self,
        endpoint: &str,
        payload: &P,
        poll: &PollOptions,
        options: &CallOptions,
    ) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        let submitted = self.submit(endpoint, payload, options).await?;
        if submitted.is_terminal() {
            let options = options.clone().raise_for_status(poll.raise_for_status);
            return self.inner.core.finish(submitted, &options);
        }
        self.poll(&submitted, poll, options).await
    }

    async fn post<P>(
        &self,
        endpoint: &str,
        payload: &P,
        mode: SyncMode,
        options: &CallOptions,
    ) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        let core = &self.inner.core;
        let body = core.shape_payload(payload, mode)?;
        let headers = core.headers(options)?;
        let url = core.endpoint_url(endpoint);

        let response = match self
            .inner
            .transport
            .request(Method::POST, &url, Some(&body), headers)
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(core.classify(err, &body)),
        };

        let job = core.parse(&url, response)?;
        core.finish(job, options)
    }
}
