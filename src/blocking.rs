use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::engine::{CallOptions, ContentModerationHook, EngineCore, ErrorHook, SyncMode};
use crate::errors::Result;
use crate::models::{JobResponse, JobStatus, PollTarget};
use crate::poller::{poll_blocking, wait_for_file_blocking, FileWaitOptions, PollOptions};
use crate::transport::BlockingTransport;

/// The blocking Bria Engine client.
///
/// Mirrors [`AsyncEngine`](crate::AsyncEngine) method for method. It is
/// `Send + Sync`; share it between threads behind an `Arc`. Inside async code,
/// call it from `spawn_blocking` or from a multi-thread runtime worker. A thread
/// driving a current-thread runtime gets
/// [`BriaError::BlockingInAsyncContext`](crate::BriaError::BlockingInAsyncContext).
///
/// # Example
///
/// ```no_run
/// use bria_engine::{CallOptions, EngineBuilder, SyncEngine};
/// use serde_json::json;
///
/// # fn example() -> bria_engine::Result<()> {
/// let engine = SyncEngine::new(EngineBuilder::new().api_token("bria_token").build()?);
/// let done = engine.run(
///     "image/edit/blur_background",
///     &json!({"image": "https://example.com/in.png", "scale": 3}),
///     &CallOptions::new().raise_for_status(true),
/// )?;
/// println!("{:?}", done.result());
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    core: EngineCore,
    transport: BlockingTransport,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_error_hook(config, ContentModerationHook)
    }

    pub fn with_error_hook(config: EngineConfig, hook: impl ErrorHook + 'static) -> Self {
        let transport = BlockingTransport::new(&config);
        Self {
            core: EngineCore::new(config, Arc::new(hook)),
            transport,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    pub fn config(&self) -> &EngineConfig {
        self.core.config()
    }

    /// Submit with `sync: true` and wait for the server's answer.
    pub fn run<P>(&self, endpoint: &str, payload: &P, options: &CallOptions) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        self.post(endpoint, payload, SyncMode::Run, options)
    }

    /// Submit with `sync: false`; the response carries the request id to poll.
    pub fn submit<P>(
        &self,
        endpoint: &str,
        payload: &P,
        options: &CallOptions,
    ) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        self.post(endpoint, payload, SyncMode::Submit, options)
    }

    pub fn status(&self, request_id: &str, options: &CallOptions) -> Result<JobStatus> {
        Ok(self.status_response(request_id, options)?.status())
    }

    pub fn status_response(&self, request_id: &str, options: &CallOptions) -> Result<JobResponse> {
        self.fetch_status(request_id, options, None)
    }

    /// Poll until the job completes or fails, blocking the calling thread.
    pub fn poll(
        &self,
        target: impl Into<PollTarget>,
        poll: &PollOptions,
        options: &CallOptions,
    ) -> Result<JobResponse> {
        let target = target.into();
        let request_id = target.request_id()?;
        poll_blocking(request_id, poll, |deadline| {
            self.fetch_status(request_id, options, deadline)
        })
    }

    /// Block until a result file can be downloaded.
    ///
    /// Sends `Range: bytes=0-0` requests without credentials until the file
    /// has content. Fails with [`BriaError::EmptyFile`](crate::BriaError::EmptyFile)
    /// if it turns out empty and with
    /// [`BriaError::FileTimeout`](crate::BriaError::FileTimeout) when the
    /// budget runs out.
    pub fn wait_for_file(&self, url: &str, options: &FileWaitOptions) -> Result<()> {
        wait_for_file_blocking(url, options, |deadline| {
            self.transport.check_file(url, deadline)
        })
    }

    pub fn submit_and_poll<P>(
        &self,
        endpoint: &str,
        payload: &P,
        poll: &PollOptions,
        options: &CallOptions,
    ) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        let submitted = self.submit(endpoint, payload, options)?;
        if submitted.is_terminal() {
            let options = options.clone().raise_for_status(poll.raise_for_status);
            return self.core.finish(submitted, &options);
        }
        self.poll(&submitted, poll, options)
    }

    fn fetch_status(
        &self,
        request_id: &str,
        options: &CallOptions,
        deadline: Option<Instant>,
    ) -> Result<JobResponse> {
        let url = self.core.status_url(request_id)?;
        let headers = self.core.headers(options)?;
        let response = self
            .transport
            .request_within(Method::GET, &url, None, headers, deadline)?;
        self.core.parse(&url, response)
    }

    fn post<P>(
        &self,
        endpoint: &str,
        payload: &P,
        mode: SyncMode,
        options: &CallOptions,
    ) -> Result<JobResponse>
    where
        P: Serialize + ?Sized,
    {
        let body = self.core.shape_payload(payload, mode)?;
        let headers = self.core.headers(options)?;
        let url = self.core.endpoint_url(endpoint);

        let response = self
            .transport
            .request(Method::POST, &url, Some(&body), headers)
            .map_err(|err| self.core.classify(err, &body))?;

        let job = self.core.parse(&url, response)?;
        self.core.finish(job, options)
    }
}
