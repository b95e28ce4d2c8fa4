//! Single-request HTTP plumbing with retry.
//!
//! [`AsyncTransport`] and [`BlockingTransport`] share the retry and error
//! classification below; they differ only in the client they drive and in how
//! they wait between attempts.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, RANGE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

use crate::config::{EngineConfig, RetryPolicy, Timeouts};
use crate::errors::{BriaError, Result};

/// Decoded body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: StatusCode,
    /// `Value::Null` for an empty body.
    pub body: Value,
}

/// Whether a result file can be downloaded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileState {
    Ready,
    /// Not there yet; carries the status the server answered with.
    Pending(StatusCode),
}

enum Step {
    Done(Result<TransportResponse>),
    /// Wait, then try again. Carries the error to report if no retry happens.
    Retry(Duration, BriaError),
}

/// Retry and error classification shared by both transports.
#[derive(Debug, Clone)]
struct Policy {
    base_url: String,
    retry: RetryPolicy,
}

impl Policy {
    fn attempts(&self) -> u32 {
        self.retry.max_attempts.max(1)
    }

    fn after_response(
        &self,
        method: &Method,
        url: &str,
        attempt: u32,
        status: StatusCode,
        text: String,
    ) -> Step {
        debug!(attempt, %method, %url, %status, "received HTTP response");

        if status.is_success() {
            return Step::Done(decode_body(url, status, &text));
        }

        let err = BriaError::Transport {
            url: url.to_string(),
            base_url: self.base_url.clone(),
            status: status.as_u16(),
            body: parse_error_body(&text),
        };
        if attempt < self.attempts() && self.retry.retries_status(method, status) {
            let delay = self.retry.backoff(attempt);
            warn!(attempt, %method, %url, %status, ?delay, "retrying after error status");
            return Step::Retry(delay, err);
        }
        Step::Done(Err(err))
    }

    fn after_error(&self, method: &Method, url: &str, attempt: u32, err: reqwest::Error) -> Step {
        debug!(attempt, %method, %url, error = %err, "HTTP request failed");

        let retry = attempt < self.attempts() && self.retry.retries_error(method, &err);
        let err = self.network_error(url, err);
        if retry {
            let delay = self.retry.backoff(attempt);
            warn!(attempt, %method, %url, ?delay, "retrying after network error");
            return Step::Retry(delay, err);
        }
        Step::Done(Err(err))
    }

    fn network_error(&self, url: &str, err: reqwest::Error) -> BriaError {
        BriaError::Network {
            url: url.to_string(),
            base_url: self.base_url.clone(),
            source: err,
        }
    }
}

fn decode_body(url: &str, status: StatusCode, text: &str) -> Result<TransportResponse> {
    if text.trim().is_empty() {
        return Ok(TransportResponse {
            status,
            body: Value::Null,
        });
    }
    let body = serde_json::from_str(text).map_err(|source| BriaError::Decode {
        url: url.to_string(),
        source,
    })?;
    Ok(TransportResponse { status, body })
}

fn parse_error_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

/// Readiness of a file from the answer to a `Range: bytes=0-0` request.
///
/// 200/206 with a positive `Content-Length` means ready. A zero or missing
/// length, or 416, means the file exists but is empty. Anything else means
/// the file is not there yet.
fn classify_file(url: &str, status: StatusCode, headers: &HeaderMap) -> Result<FileState> {
    match status {
        StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
            let length = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0);
            if length > 0 {
                Ok(FileState::Ready)
            } else {
                Err(BriaError::EmptyFile {
                    url: url.to_string(),
                    status: status.as_u16(),
                })
            }
        }
        StatusCode::RANGE_NOT_SATISFIABLE => Err(BriaError::EmptyFile {
            url: url.to_string(),
            status: status.as_u16(),
        }),
        other => Ok(FileState::Pending(other)),
    }
}

fn first_byte() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RANGE, HeaderValue::from_static("bytes=0-0"));
    headers
}

/// Time left before `deadline`, capped at `cap`.
fn time_left(deadline: Option<Instant>, cap: Duration) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(cap),
        None => cap,
    }
}

/// Run blocking work from wherever the caller happens to be.
///
/// Plain threads and `spawn_blocking` threads run `f` directly. Multi-thread
/// runtime workers hand their other tasks off first. A thread driving a
/// current-thread runtime cannot give it up, so the call is refused there.
fn off_executor<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    if Handle::try_current().is_err() {
        return f();
    }

    let mut started = false;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        tokio::task::block_in_place(|| {
            started = true;
            f()
        })
    }));
    match outcome {
        Ok(result) => result,
        Err(_) if !started => Err(BriaError::BlockingInAsyncContext),
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Sleep the calling thread without stalling a runtime it may be serving.
pub(crate) fn pause(delay: Duration) -> Result<()> {
    off_executor(|| {
        std::thread::sleep(delay);
        Ok(())
    })
}

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(0);

/// An async client opened on this thread for one transport.
struct ThreadClient {
    owner: u64,
    alive: Weak<()>,
    client: reqwest::Client,
}

thread_local! {
    /// Clients for current-thread runtimes, dropped with their thread.
    static THREAD_CLIENTS: RefCell<Vec<ThreadClient>> = const { RefCell::new(Vec::new()) };
}

/// Async transport backed by pooled `reqwest::Client`s.
///
/// hyper binds pooled connections to the runtime that opened them, so one
/// client is shared by multi-thread runtimes and current-thread runtimes get
/// a client per thread. Per-thread clients live in a thread-local cache: they
/// go away with their thread or with the transport, and entries left behind
/// by dropped transports are pruned whenever the thread opens a new client.
pub struct AsyncTransport {
    id: u64,
    alive: Arc<()>,
    policy: Policy,
    timeouts: Timeouts,
    shared: OnceCell<reqwest::Client>,
}

impl AsyncTransport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            policy: Policy {
                base_url: config.base_url().to_string(),
                retry: config.retry().clone(),
            },
            timeouts: config.timeouts().clone(),
            shared: OnceCell::new(),
        }
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        let t = &self.timeouts;
        reqwest::Client::builder()
            .connect_timeout(t.connect)
            .timeout(t.request)
            .pool_idle_timeout(t.pool_idle)
            .pool_max_idle_per_host(t.pool_max_idle_per_host)
            .build()
            .map_err(BriaError::Client)
    }

    /// The pooled client for the calling runtime, created on first use.
    fn client(&self) -> Result<reqwest::Client> {
        let multi_thread = matches!(
            Handle::try_current(),
            Ok(handle) if handle.runtime_flavor() != RuntimeFlavor::CurrentThread
        );
        if multi_thread {
            return self
                .shared
                .get_or_try_init(|| {
                    debug!("created shared async HTTP client");
                    self.build_client()
                })
                .cloned();
        }

        let cached = THREAD_CLIENTS.try_with(|cache| -> Result<reqwest::Client> {
            let mut cache = cache.borrow_mut();
            if let Some(entry) = cache.iter().find(|entry| entry.owner == self.id) {
                return Ok(entry.client.clone());
            }
            cache.retain(|entry| entry.alive.strong_count() > 0);

            let client = self.build_client()?;
            cache.push(ThreadClient {
                owner: self.id,
                alive: Arc::downgrade(&self.alive),
                client: client.clone(),
            });
            debug!(cached = cache.len(), "created async HTTP client for this thread");
            Ok(client)
        });
        // thread-local storage is gone during thread teardown
        cached.unwrap_or_else(|_| self.build_client())
    }

    /// Execute one logical request, retrying per the engine's policy.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: HeaderMap,
    ) -> Result<TransportResponse> {
        let client = self.client()?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, %method, %url, "sending HTTP request");

            let mut req = client.request(method.clone(), url).headers(headers.clone());
            if let Some(b) = body {
                req = req.json(b);
            }

            let step = match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response
                        .text()
                        .await
                        .map_err(|e| self.policy.network_error(url, e))?;
                    self.policy.after_response(&method, url, attempt, status, text)
                }
                Err(err) => self.policy.after_error(&method, url, attempt, err),
            };

            match step {
                Step::Done(result) => return result,
                Step::Retry(delay, _) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Ask for the first byte of `url` once. No credentials, no retry.
    pub(crate) async fn check_file(&self, url: &str) -> Result<FileState> {
        let client = self.client()?;
        debug!(%url, "checking file readiness");
        let response = client
            .get(url)
            .headers(first_byte())
            .send()
            .await
            .map_err(|e| self.policy.network_error(url, e))?;
        classify_file(url, response.status(), response.headers())
    }
}

impl Drop for AsyncTransport {
    fn drop(&mut self) {
        let id = self.id;
        let _ = THREAD_CLIENTS.try_with(|cache| {
            if let Ok(mut cache) = cache.try_borrow_mut() {
                cache.retain(|entry| entry.owner != id);
            }
        });
    }
}

/// Blocking transport backed by one pooled `reqwest::blocking::Client`.
pub struct BlockingTransport {
    policy: Policy,
    timeouts: Timeouts,
    client: OnceCell<reqwest::blocking::Client>,
}

impl BlockingTransport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            policy: Policy {
                base_url: config.base_url().to_string(),
                retry: config.retry().clone(),
            },
            timeouts: config.timeouts().clone(),
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        self.client.get_or_try_init(|| {
            let t = &self.timeouts;
            reqwest::blocking::Client::builder()
                .connect_timeout(t.connect)
                .timeout(t.request)
                .pool_idle_timeout(t.pool_idle)
                .pool_max_idle_per_host(t.pool_max_idle_per_host)
                .build()
                .map_err(BriaError::Client)
        })
    }

    /// Execute one logical request on the calling thread.
    ///
    /// Works from plain threads, `spawn_blocking` threads and multi-thread
    /// runtime workers. Fails with [`BriaError::BlockingInAsyncContext`] on a
    /// thread driving a current-thread runtime, where blocking would stall
    /// the executor.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: HeaderMap,
    ) -> Result<TransportResponse> {
        self.request_within(method, url, body, headers, None)
    }

    /// [`request`](Self::request), giving up once `deadline` passes.
    ///
    /// Each attempt's timeout is cut to the time left, and a retry whose
    /// backoff would reach the deadline is not attempted.
    pub(crate) fn request_within(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: HeaderMap,
        deadline: Option<Instant>,
    ) -> Result<TransportResponse> {
        off_executor(|| {
            let client = self.client()?;
            let mut attempt = 0;

            loop {
                attempt += 1;
                debug!(attempt, %method, %url, "sending HTTP request");

                let mut req = client
                    .request(method.clone(), url)
                    .headers(headers.clone())
                    .timeout(time_left(deadline, self.timeouts.request));
                if let Some(b) = body {
                    req = req.json(b);
                }

                let step = match req.send() {
                    Ok(response) => {
                        let status = response.status();
                        let text = response
                            .text()
                            .map_err(|e| self.policy.network_error(url, e))?;
                        self.policy.after_response(&method, url, attempt, status, text)
                    }
                    Err(err) => self.policy.after_error(&method, url, attempt, err),
                };

                match step {
                    Step::Done(result) => return result,
                    Step::Retry(delay, err) => {
                        if let Some(deadline) = deadline {
                            let resume = Instant::now().checked_add(delay);
                            if resume.map_or(true, |at| at >= deadline) {
                                debug!(%method, %url, ?delay, "no time left for another attempt");
                                return Err(err);
                            }
                        }
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                }
            }
        })
    }

    /// Ask for the first byte of `url` once. No credentials, no retry.
    pub(crate) fn check_file(&self, url: &str, deadline: Option<Instant>) -> Result<FileState> {
        off_executor(|| {
            debug!(%url, "checking file readiness");
            let response = self
                .client()?
                .get(url)
                .headers(first_byte())
                .timeout(time_left(deadline, self.timeouts.request))
                .send()
                .map_err(|e| self.policy.network_error(url, e))?;
            classify_file(url, response.status(), response.headers())
        })
    }
}
