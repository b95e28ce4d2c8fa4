//! Status polling.
//!
//! [`Poller`] decides what happens after each status snapshot; the async and
//! blocking loops only differ in how they fetch and how they sleep. The file
//! wait at the bottom uses the same budget rules on a result URL.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::errors::{BriaError, Result};
use crate::models::JobResponse;
use crate::transport::{pause, FileState};

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between status calls. Default: 1s.
    pub interval: Duration,
    /// Wall-clock budget, measured from the first status call. Default: 60s.
    pub timeout: Duration,
    /// Turn a failed job into [`BriaError::Job`]. Default: `true`.
    pub raise_for_status: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            raise_for_status: true,
        }
    }
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            ..Self::default()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = raise;
        self
    }
}

/// Options for [`AsyncEngine::wait_for_file`](crate::AsyncEngine::wait_for_file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWaitOptions {
    /// Pause between checks. Default: 2s.
    pub interval: Duration,
    /// Wall-clock budget, measured from the first check. Default: 120s.
    pub timeout: Duration,
}

impl Default for FileWaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

impl FileWaitOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Wall-clock budget started right before the first request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    started: Instant,
    timeout: Duration,
}

impl Budget {
    pub(crate) fn start(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    /// `None` when the budget is too large to express as an instant.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.started.checked_add(self.timeout)
    }

    pub(crate) fn expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }
}

pub(crate) enum PollStep {
    Done(JobResponse),
    Wait(Duration),
}

/// Per-poll bookkeeping. Lives on the polling task's stack only.
pub(crate) struct Poller<'a> {
    request_id: &'a str,
    options: &'a PollOptions,
    budget: Budget,
    calls: u32,
}

impl<'a> Poller<'a> {
    /// Start the clock; call right before the first status request.
    pub(crate) fn start(request_id: &'a str, options: &'a PollOptions) -> Self {
        Self {
            request_id,
            options,
            budget: Budget::start(options.timeout),
            calls: 0,
        }
    }

    pub(crate) fn budget(&self) -> &Budget {
        &self.budget
    }

    pub(crate) fn timed_out(&self) -> BriaError {
        BriaError::Timeout {
            request_id: self.request_id.to_string(),
            timeout: self.options.timeout,
            elapsed: self.budget.elapsed(),
        }
    }

    /// A failed status call past the deadline is reported as a timeout.
    pub(crate) fn failed(&self, err: BriaError) -> BriaError {
        if self.budget.expired() {
            debug!(request_id = self.request_id, error = %err, "status call ran out of time");
            return self.timed_out();
        }
        err
    }

    /// Decide what to do with the latest snapshot.
    ///
    /// Terminal snapshots finish the poll. Otherwise the poll times out if
    /// waiting another interval would reach the budget.
    pub(crate) fn next(&mut self, response: JobResponse) -> Result<PollStep> {
        self.calls += 1;

        if response.is_terminal() {
            debug!(
                request_id = self.request_id,
                status = %response.status(),
                calls = self.calls,
                "job reached terminal status"
            );
            if self.options.raise_for_status {
                response.raise_for_status()?;
            }
            return Ok(PollStep::Done(response));
        }

        let elapsed = self.budget.elapsed();
        if elapsed.saturating_add(self.options.interval) >= self.options.timeout {
            return Err(self.timed_out());
        }

        debug!(
            request_id = self.request_id,
            status = %response.status(),
            calls = self.calls,
            ?elapsed,
            "job still in progress"
        );
        Ok(PollStep::Wait(self.options.interval))
    }
}

/// Poll on the current task, yielding to the runtime between calls.
///
/// A status call still running when the budget ends is abandoned. Dropping
/// the returned future stops polling at whichever await it is suspended on.
pub(crate) async fn poll_async<F, Fut>(
    request_id: &str,
    options: &PollOptions,
    mut fetch: F,
) -> Result<JobResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobResponse>>,
{
    let mut poller = Poller::start(request_id, options);
    loop {
        let response = match tokio::time::timeout(poller.budget().remaining(), fetch()).await {
            Ok(fetched) => fetched.map_err(|err| poller.failed(err))?,
            Err(_) => return Err(poller.timed_out()),
        };
        match poller.next(response)? {
            PollStep::Done(response) => return Ok(response),
            PollStep::Wait(delay) => tokio::time::sleep(delay).await,
        }
    }
}

/// Poll on the calling thread, blocking it between calls.
///
/// `fetch` receives the poll's deadline and must not block past it.
pub(crate) fn poll_blocking<F>(
    request_id: &str,
    options: &PollOptions,
    mut fetch: F,
) -> Result<JobResponse>
where
    F: FnMut(Option<Instant>) -> Result<JobResponse>,
{
    let mut poller = Poller::start(request_id, options);
    loop {
        let response = fetch(poller.budget().deadline()).map_err(|err| poller.failed(err))?;
        match poller.next(response)? {
            PollStep::Done(response) => return Ok(response),
            PollStep::Wait(delay) => pause(delay)?,
        }
    }
}

/// Bookkeeping for one file wait.
struct FileWait<'a> {
    url: &'a str,
    options: &'a FileWaitOptions,
    budget: Budget,
    checks: u32,
}

impl<'a> FileWait<'a> {
    fn start(url: &'a str, options: &'a FileWaitOptions) -> Self {
        Self {
            url,
            options,
            budget: Budget::start(options.timeout),
            checks: 0,
        }
    }

    fn timed_out(&self) -> BriaError {
        BriaError::FileTimeout {
            url: self.url.to_string(),
            timeout: self.options.timeout,
            elapsed: self.budget.elapsed(),
        }
    }

    /// `Some(delay)` to check again after `delay`, `None` once the file is ready.
    fn after(&mut self, checked: Result<FileState>) -> Result<Option<Duration>> {
        self.checks += 1;
        match checked {
            Ok(FileState::Ready) => {
                debug!(url = self.url, checks = self.checks, "file is ready");
                Ok(None)
            }
            Ok(FileState::Pending(status)) => {
                if self.budget.expired() {
                    return Err(self.timed_out());
                }
                debug!(url = self.url, %status, checks = self.checks, "file not ready yet");
                Ok(Some(self.options.interval.min(self.budget.remaining())))
            }
            Err(err @ BriaError::EmptyFile { .. }) => Err(err),
            Err(_) if self.budget.expired() => Err(self.timed_out()),
            Err(err) => Err(err),
        }
    }
}

/// Wait until `url` serves at least one byte, yielding between checks.
pub(crate) async fn wait_for_file_async<F, Fut>(
    url: &str,
    options: &FileWaitOptions,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<FileState>>,
{
    let mut wait = FileWait::start(url, options);
    while !wait.budget.expired() {
        let checked = match tokio::time::timeout(wait.budget.remaining(), check()).await {
            Ok(checked) => checked,
            Err(_) => break,
        };
        match wait.after(checked)? {
            None => return Ok(()),
            Some(delay) => tokio::time::sleep(delay).await,
        }
    }
    Err(wait.timed_out())
}

/// Wait until `url` serves at least one byte, blocking between checks.
pub(crate) fn wait_for_file_blocking<F>(
    url: &str,
    options: &FileWaitOptions,
    mut check: F,
) -> Result<()>
where
    F: FnMut(Option<Instant>) -> Result<FileState>,
{
    let mut wait = FileWait::start(url, options);
    while !wait.budget.expired() {
        match wait.after(check(wait.budget.deadline()))? {
            None => return Ok(()),
            Some(delay) => pause(delay)?,
        }
    }
    Err(wait.timed_out())
}
