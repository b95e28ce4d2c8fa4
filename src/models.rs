use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Lifecycle state of a job as reported by the status API.
///
/// On the wire the states are `UNKNOWN`, `IN_PROGRESS`, `COMPLETED` and `ERROR`.
/// `FAILED` and `RUNNING` are accepted when parsing; anything else parses as
/// [`JobStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Unknown,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// The wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Running => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "ERROR",
        }
    }

    /// Parse a wire status string.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "IN_PROGRESS" | "RUNNING" => Self::Running,
            "COMPLETED" => Self::Completed,
            "ERROR" | "FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Completed or failed: polling stops here.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// Error reported by the server for a failed job.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("job error {code}: {message}")]
pub struct JobError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub details: String,
}

impl JobError {
    pub fn new(code: i64, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: details.into(),
        }
    }

    /// Build a job error out of a non-2xx HTTP response.
    ///
    /// The engine wraps errors as `{"error": {"code", "message", "details"}}`;
    /// bodies in any other shape keep their text as the message.
    pub fn from_http(status: u16, body: Option<&Value>) -> Self {
        let wrapped = body
            .and_then(|b| b.get("error"))
            .and_then(|e| serde_json::from_value::<JobError>(e.clone()).ok());
        if let Some(err) = wrapped {
            return err;
        }

        let message = match body {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let details = body
            .and_then(|b| b.get("details"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self::new(i64::from(status), message, details)
    }
}

/// Operation-specific result of a completed job.
///
/// The SDK does not interpret its fields; use [`JobResponse::result_as`] to
/// deserialize it into a concrete type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobResult(Map<String, Value>);

impl JobResult {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Shortcut for string fields such as `image_url` or `video_url`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// One snapshot of a job, as returned by submit, run and status calls.
///
/// Snapshots are immutable; every status call produces a fresh one. At most
/// one of `result` and `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawJobResponse")]
pub struct JobResponse {
    request_id: String,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_url: Option<String>,
}

/// Reasons a response body cannot become a [`JobResponse`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidJobResponse {
    #[error("request_id is missing or empty")]
    MissingRequestId,
    #[error("response carries both `result` and `error`")]
    ResultAndError,
}

#[derive(Deserialize)]
struct RawJobResponse {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    result: Option<JobResult>,
    #[serde(default)]
    error: Option<JobError>,
    #[serde(default)]
    status_url: Option<String>,
}

impl TryFrom<RawJobResponse> for JobResponse {
    type Error = InvalidJobResponse;

    fn try_from(raw: RawJobResponse) -> Result<Self, Self::Error> {
        let request_id = raw
            .request_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(InvalidJobResponse::MissingRequestId)?;

        if raw.result.is_some() && raw.error.is_some() {
            return Err(InvalidJobResponse::ResultAndError);
        }

        // a present error or result decides the status, whatever the server
        // put in `status`
        let status = if raw.error.is_some() {
            JobStatus::Failed
        } else if raw.result.is_some() {
            JobStatus::Completed
        } else if let Some(status) = raw.status {
            status
        } else if raw.status_url.is_some() {
            JobStatus::Running
        } else {
            JobStatus::Unknown
        };

        Ok(Self {
            request_id,
            status,
            result: raw.result,
            error: raw.error,
            status_url: raw.status_url,
        })
    }
}

impl JobResponse {
    /// A job the server is still working on.
    pub fn running(request_id: impl Into<String>, status_url: Option<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: JobStatus::Running,
            result: None,
            error: None,
            status_url,
        }
    }

    pub fn completed(request_id: impl Into<String>, result: JobResult) -> Self {
        Self {
            request_id: request_id.into(),
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
            status_url: None,
        }
    }

    pub fn failed(request_id: impl Into<String>, error: JobError) -> Self {
        Self {
            request_id: request_id.into(),
            status: JobStatus::Failed,
            result: None,
            error: Some(error),
            status_url: None,
        }
    }

    pub fn unknown(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: JobStatus::Unknown,
            result: None,
            error: None,
            status_url: None,
        }
    }

    /// Parse a decoded JSON body.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn status_url(&self) -> Option<&str> {
        self.status_url.as_deref()
    }

    /// `true` while the job may still change. An unknown status counts as
    /// in progress so polling never stops early.
    pub fn in_progress(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// Return the job error, if the server reported one.
    pub fn raise_for_status(&self) -> Result<(), JobError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Deserialize the result into `T`. `Ok(None)` when there is no result.
    pub fn result_as<T: DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        self.result
            .as_ref()
            .map(|r| serde_json::from_value(Value::Object(r.fields().clone())))
            .transpose()
    }
}

/// What to poll: a bare request id or a previously returned [`JobResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget(String);

impl PollTarget {
    /// The request id, rejecting blank ids.
    pub fn request_id(&self) -> crate::Result<&str> {
        let id = self.0.trim();
        if id.is_empty() {
            return Err(crate::BriaError::InvalidRequestId);
        }
        Ok(id)
    }
}

impl From<&str> for PollTarget {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PollTarget {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&String> for PollTarget {
    fn from(id: &String) -> Self {
        Self(id.clone())
    }
}

impl From<&JobResponse> for PollTarget {
    fn from(response: &JobResponse) -> Self {
        Self(response.request_id.clone())
    }
}

impl From<JobResponse> for PollTarget {
    fn from(response: JobResponse) -> Self {
        Self(response.request_id)
    }
}
