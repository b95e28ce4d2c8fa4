//! # Bria Engine SDK for Rust
//!
//! Client for the [Bria](https://bria.ai) image and video editing API. Submit
//! jobs, poll them to completion, and read their results, from async code or
//! from plain threads.
//!
//! ## Quick start
//!
//! ```no_run
//! use bria_engine::{operations, AsyncEngine, CallOptions, EngineBuilder};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> bria_engine::Result<()> {
//!     let engine = AsyncEngine::new(EngineBuilder::new().api_token("bria_token").build()?);
//!
//!     let op = operations::REMOVE_BACKGROUND;
//!     let done = engine
//!         .submit_and_poll(
//!             op.path,
//!             &json!({"image": "https://example.com/in.png"}),
//!             &op.poll_options(),
//!             &CallOptions::new(),
//!         )
//!         .await?;
//!
//!     println!("{:?}", done.result().and_then(|r| r.get_str("image_url")));
//!     Ok(())
//! }
//! ```
//!
//! ## Per-call credentials
//!
//! A token passed through [`CallOptions`] applies to that request only, so a
//! single engine can serve many tenants concurrently:
//!
//! ```no_run
//! # use bria_engine::{AsyncEngine, CallOptions};
//! # use serde_json::json;
//! # async fn example(engine: AsyncEngine) -> bria_engine::Result<()> {
//! let opts = CallOptions::new().api_token("tenant_token");
//! let resp = engine.run("image/edit/enhance", &json!({"image": "..."}), &opts).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Blocking use
//!
//! [`SyncEngine`] offers the same operations without an async runtime.

mod asynchronous;
mod auth;
mod blocking;
mod config;
mod engine;
mod errors;
mod models;
pub mod operations;
mod poller;
mod results;
mod transport;

pub use asynchronous::AsyncEngine;
pub use auth::{
    AuthChannel, Credential, CredentialOverride, HeaderSource, API_TOKEN_HEADER,
    INTERNAL_REQUEST_HEADER, JWT_HEADER,
};
pub use blocking::SyncEngine;
pub use config::{
    EngineBuilder, EngineConfig, RetryPolicy, Timeouts, API_TOKEN_ENV, BASE_URL_ENV,
    DEFAULT_BASE_URL, JWT_ENV,
};
pub use engine::{CallOptions, ContentModerationHook, ErrorHook, MODERATION_FLAGS};
pub use errors::{BriaError, Result};
pub use models::{InvalidJobResponse, JobError, JobResponse, JobResult, JobStatus, PollTarget};
pub use operations::{Operation, OperationFamily};
pub use poller::{FileWaitOptions, PollOptions};
pub use results::{
    GeneratedImageResult, ImageResult, MaskResult, OperationResult, ResultKind,
    StructuredPromptResult, VideoResult,
};
pub use transport::{AsyncTransport, BlockingTransport, TransportResponse};
