//! Quick-start examples for the Bria Engine Rust SDK.
//!
//! Run with:
//!   BRIA_API_TOKEN=... cargo run --example quickstart
//!
//! Set `RUST_LOG=bria_engine=debug` to see each request and retry.

use std::time::Duration;

use bria_engine::{
    operations, AsyncEngine, BriaError, CallOptions, FileWaitOptions, JobStatus, PollOptions,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const SAMPLE_IMAGE: &str = "https://example.com/portrait.png";

#[tokio::main]
async fn main() -> bria_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // -----------------------------------------------------------------------
    // 1. Create an engine (reads BRIA_API_TOKEN / BRIA_BASE_URL, and .env)
    // -----------------------------------------------------------------------
    let engine = AsyncEngine::from_env()?;
    println!("Using {}", engine.config().base_url());

    // -----------------------------------------------------------------------
    // 2. Run a job synchronously: the server answers once it is done
    // -----------------------------------------------------------------------
    let done = engine
        .run(
            operations::REMOVE_BACKGROUND.path,
            &json!({"image": SAMPLE_IMAGE}),
            &CallOptions::new().raise_for_status(true),
        )
        .await?;
    println!(
        "Background removed: {}",
        done.result().and_then(|r| r.get_str("image_url")).unwrap_or("-")
    );

    // -----------------------------------------------------------------------
    // 3. Submit, then poll with the operation's defaults
    // -----------------------------------------------------------------------
    let op = operations::GENERATE_IMAGE;
    let submitted = engine
        .submit(op.path, &json!({"prompt": "a lighthouse at dusk"}), &CallOptions::new())
        .await?;
    println!("Submitted {} ({})", submitted.request_id(), submitted.status());

    let done = engine
        .poll(&submitted, &op.poll_options(), &CallOptions::new())
        .await?;
    println!("Generated: {:?}", done.result().map(|r| r.fields()));

    // The image URL can be announced before the file is written
    let generated = op.parse_result(&done).map_err(|source| BriaError::Decode {
        url: op.path.to_string(),
        source,
    })?;
    if let Some(url) = generated.as_ref().and_then(|r| r.file_url()) {
        engine.wait_for_file(url, &FileWaitOptions::default()).await?;
        println!("Ready to download: {url}");
    }

    // -----------------------------------------------------------------------
    // 4. Check a job later by id
    // -----------------------------------------------------------------------
    let status = engine.status(submitted.request_id(), &CallOptions::new()).await?;
    if status == JobStatus::Completed {
        println!("Job {} is still retrievable", submitted.request_id());
    }

    // -----------------------------------------------------------------------
    // 5. Per-call credentials and content moderation
    // -----------------------------------------------------------------------
    let tenant = CallOptions::new().api_token("tenant_token");
    let fast = PollOptions::new(Duration::from_millis(500), Duration::from_secs(30));
    let outcome = engine
        .submit_and_poll(
            operations::GEN_FILL.path,
            &json!({
                "image": SAMPLE_IMAGE,
                "mask": "https://example.com/mask.png",
                "prompt": "a red scarf",
                "prompt_content_moderation": true
            }),
            &fast,
            &tenant,
        )
        .await;

    match outcome {
        Ok(done) => println!("Filled: {:?}", done.result()),
        Err(BriaError::ContentModeration(err)) => println!("Blocked by moderation: {err}"),
        Err(err) => return Err(err),
    }

    Ok(())
}
