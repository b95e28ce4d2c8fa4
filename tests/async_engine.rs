use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bria_engine::{
    operations, AsyncEngine, BriaError, CallOptions, EngineBuilder, FileWaitOptions, JobStatus,
    MaskResult, OperationResult, PollOptions, RetryPolicy,
};
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn engine_for(server: &MockServer) -> AsyncEngine {
    let config = EngineBuilder::new()
        .base_url(server.uri())
        .api_token("default")
        .retry(RetryPolicy::default().backoff_factor(Duration::from_millis(5)))
        .build()
        .expect("config");
    AsyncEngine::new(config)
}

async fn requests(server: &MockServer) -> Vec<Request> {
    server.received_requests().await.unwrap_or_default()
}

fn body_of(req: &Request) -> Value {
    serde_json::from_slice(&req.body).expect("json body")
}

/// Responds with `running` for the first `n` calls, then with `last`.
fn scripted(
    n: usize,
    last: Value,
    calls: Arc<AtomicUsize>,
) -> impl Fn(&Request) -> ResponseTemplate {
    move |_req: &Request| {
        let seen = calls.fetch_add(1, Ordering::SeqCst);
        if seen < n {
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "IN_PROGRESS", "request_id": "r1"}))
        } else {
            ResponseTemplate::new(200).set_body_json(last.clone())
        }
    }
}

#[tokio::test]
async fn run_sends_sync_true_and_returns_resolved_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/image/edit/remove_background"))
        .and(header("api_token", "default"))
        .and(body_partial_json(json!({"sync": true, "image": "in.png"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "r1",
            "result": {"image_url": "https://x/out.png"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let resp = engine
        .run("image/edit/remove_background", &json!({"image": "in.png"}), &CallOptions::new())
        .await
        .expect("run");

    assert_eq!(resp.status(), JobStatus::Completed);
    assert_eq!(resp.request_id(), "r1");
    assert_eq!(resp.result().and_then(|r| r.get_str("image_url")), Some("https://x/out.png"));
}

#[tokio::test]
async fn submit_sends_sync_false_and_returns_running_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/image/edit/erase"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "request_id": "r2",
            "status_url": format!("{}/v2/status/r2", server.uri())
        })))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let resp = engine
        .submit("/image/edit/erase", &json!({"x": 1}), &CallOptions::new())
        .await
        .expect("submit");

    assert_eq!(resp.status(), JobStatus::Running);
    assert!(resp.in_progress());
    let sent = requests(&server).await;
    assert_eq!(body_of(&sent[0]), json!({"x": 1, "sync": false}));
}

#[tokio::test]
async fn preset_sync_fails_before_any_request() {
    let server = MockServer::start().await;
    let engine = engine_for(&server);

    let err = engine
        .run("image/edit/erase", &json!({"sync": true, "x": 1}), &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BriaError::InvalidPayload(_)));

    let err = engine
        .submit("image/edit/erase", &json!({"sync": false}), &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BriaError::InvalidPayload(_)));

    assert!(requests(&server).await.is_empty());
}

#[tokio::test]
async fn missing_credential_fails_before_any_request() {
    let server = MockServer::start().await;
    let engine = AsyncEngine::new(EngineBuilder::new().base_url(server.uri()).build().unwrap());

    let err = engine
        .submit("image/edit/erase", &json!({}), &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BriaError::MissingAuthentication));
    assert!(requests(&server).await.is_empty());
}

#[tokio::test]
async fn polls_until_completed() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/v2/status/r1"))
        .respond_with(scripted(
            2,
            json!({
                "status": "COMPLETED",
                "request_id": "r1",
                "result": {"image_url": "https://x/y.png"}
            }),
            calls.clone(),
        ))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let options = PollOptions::new(Duration::from_millis(10), Duration::from_secs(5));
    let resp = engine.poll("r1", &options, &CallOptions::new()).await.expect("poll");

    assert_eq!(resp.status(), JobStatus::Completed);
    assert_eq!(resp.result().and_then(|r| r.get_str("image_url")), Some("https://x/y.png"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn poll_times_out_without_terminal_status() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .respond_with(scripted(usize::MAX, json!({}), calls.clone()))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let options = PollOptions::new(Duration::from_millis(20), Duration::from_millis(100));
    let err = engine.poll("r1", &options, &CallOptions::new()).await.unwrap_err();

    assert!(matches!(err, BriaError::Timeout { ref request_id, .. } if request_id == "r1"));
    let made = calls.load(Ordering::SeqCst);
    assert!((2..=6).contains(&made), "unexpected call count {made}");
}

#[tokio::test]
async fn poll_accepts_previous_response_and_returns_failures_on_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"request_id": "r9", "status": "IN_PROGRESS"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/status/r9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "r9",
            "status": "ERROR",
            "error": {"code": 500, "message": "generation failed", "details": "oom"}
        })))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let submitted = engine
        .submit("image/generate", &json!({"prompt": "a cat"}), &CallOptions::new())
        .await
        .unwrap();

    let fast = PollOptions::new(Duration::from_millis(5), Duration::from_secs(1));
    let err = engine.poll(&submitted, &fast, &CallOptions::new()).await.unwrap_err();
    match err {
        BriaError::Job(job) => {
            assert_eq!(job.code, 500);
            assert_eq!(job.details, "oom");
        }
        other => panic!("expected job error, got {other:?}"),
    }

    let resp = engine
        .poll(&submitted, &fast.clone().raise_for_status(false), &CallOptions::new())
        .await
        .unwrap();
    assert!(resp.is_failed());
}

#[tokio::test]
async fn status_returns_current_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/status/abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"request_id": "abc", "status": "IN_PROGRESS"})),
        )
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let status = engine.status("abc", &CallOptions::new()).await.unwrap();
    assert_eq!(status, JobStatus::Running);

    let err = engine.status("", &CallOptions::new()).await.unwrap_err();
    assert!(matches!(err, BriaError::InvalidRequestId));
}

#[tokio::test]
async fn submit_and_poll_chains_both_steps() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/video/segment/mask_by_prompt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"request_id": "r1", "status_url": "u"})),
        )
        .mount(&server)
        .await;
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/v2/status/r1"))
        .respond_with(scripted(
            1,
            json!({"request_id": "r1", "result": {"mask_url": "https://x/m.mp4"}}),
            calls,
        ))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let options = PollOptions::new(Duration::from_millis(5), Duration::from_secs(2));
    let resp = engine
        .submit_and_poll(
            operations::VIDEO_MASK_BY_PROMPT.path,
            &json!({"video": "v.mp4", "prompt": "dog"}),
            &options,
            &CallOptions::new(),
        )
        .await
        .unwrap();

    let typed: MaskResult = resp.result_as().unwrap().unwrap();
    assert_eq!(typed.mask_url, "https://x/m.mp4");
}

#[tokio::test]
async fn transport_errors_carry_route_and_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "bad image"})))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let err = engine
        .run("image/edit/enhance", &json!({"image": "x"}), &CallOptions::new())
        .await
        .unwrap_err();

    match err {
        BriaError::Transport {
            url,
            base_url,
            status,
            body,
        } => {
            assert_eq!(url, format!("{}/v2/image/edit/enhance", server.uri()));
            assert_eq!(base_url, server.uri());
            assert_eq!(status, 400);
            assert_eq!(body, Some(json!({"message": "bad image"})));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn moderated_422_becomes_content_moderation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "error": {"code": 422, "message": "content moderation", "details": "input image"}
        })))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let err = engine
        .run(
            "image/edit/gen_fill",
            &json!({"image": "x", "visual_input_content_moderation": true}),
            &CallOptions::new(),
        )
        .await
        .unwrap_err();
    match err {
        BriaError::ContentModeration(job) => assert_eq!(job.details, "input image"),
        other => panic!("expected moderation error, got {other:?}"),
    }

    let err = engine
        .run("image/edit/gen_fill", &json!({"image": "x"}), &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BriaError::Transport { status: 422, .. }));
}

#[tokio::test]
async fn custom_error_hook_replaces_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let config = EngineBuilder::new()
        .base_url(server.uri())
        .api_token("t")
        .build()
        .unwrap();
    let engine = AsyncEngine::with_error_hook(config, |err: BriaError, payload: &Value| {
        if payload.get("strict").is_some() {
            BriaError::InvalidPayload(format!("rejected upstream: {err}"))
        } else {
            err
        }
    });

    let err = engine
        .run("image/edit/erase", &json!({"strict": 1}), &CallOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BriaError::InvalidPayload(_)));
}

#[tokio::test]
async fn run_can_raise_job_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "r1",
            "error": {"code": 460, "message": "failed", "details": "d"}
        })))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let resp = engine
        .run("image/edit/erase", &json!({}), &CallOptions::new())
        .await
        .unwrap();
    assert!(resp.is_failed());

    let err = engine
        .run("image/edit/erase", &json!({}), &CallOptions::new().raise_for_status(true))
        .await
        .unwrap_err();
    assert!(matches!(err, BriaError::Job(ref job) if job.code == 460));
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "COMPLETED"})))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let err = engine.status("r1", &CallOptions::new()).await.unwrap_err();
    assert!(matches!(err, BriaError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn sends_default_and_extra_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-internal-request", "true"))
        .and(header("x-client", "sdk-test"))
        .and(header("jwt", "signed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"request_id": "r1"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = EngineBuilder::new()
        .base_url(server.uri())
        .jwt("signed")
        .internal_request()
        .build()
        .unwrap();
    let engine = AsyncEngine::new(config);
    let options = CallOptions::new().header(
        HeaderName::from_static("x-client"),
        HeaderValue::from_static("sdk-test"),
    );
    let resp = engine.submit("image/edit/erase", &json!({}), &options).await.unwrap();
    assert_eq!(resp.status(), JobStatus::Unknown);

    let sent = requests(&server).await;
    assert!(sent[0].headers.get("api_token").is_none());
}

#[tokio::test]
async fn dropping_a_poll_stops_it() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .respond_with(scripted(usize::MAX, json!({}), calls.clone()))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let options = PollOptions::new(Duration::from_millis(20), Duration::from_secs(30));
    let outcome = tokio::time::timeout(
        Duration::from_millis(70),
        engine.poll("r1", &options, &CallOptions::new()),
    )
    .await;
    assert!(outcome.is_err(), "poll should still be running when cancelled");

    // let a request that was in flight at the drop settle first
    tokio::time::sleep(Duration::from_millis(20)).await;
    let after_cancel = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
}

#[tokio::test]
async fn poll_timeout_cuts_off_a_slow_status_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "IN_PROGRESS", "request_id": "r1"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let options = PollOptions::new(Duration::from_millis(50), Duration::from_millis(300));
    let started = Instant::now();
    let err = engine
        .poll("r1", &options, &CallOptions::new())
        .await
        .unwrap_err();

    match err {
        BriaError::Timeout { request_id, timeout, .. } => {
            assert_eq!(request_id, "r1");
            assert_eq!(timeout, options.timeout);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn result_file_is_awaited_after_the_job_completes() {
    let server = MockServer::start().await;
    let file_url = format!("{}/files/mask.mp4", server.uri());
    Mock::given(method("POST"))
        .and(path("/v2/video/segment/mask_by_prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "r1",
            "result": {"mask_url": file_url}
        })))
        .mount(&server)
        .await;
    let checks = Arc::new(AtomicUsize::new(0));
    let seen = checks.clone();
    Mock::given(method("GET"))
        .and(path("/files/mask.mp4"))
        .and(header("range", "bytes=0-0"))
        .respond_with(move |_: &Request| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(404)
            } else {
                ResponseTemplate::new(206).set_body_bytes(vec![0u8])
            }
        })
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let op = operations::VIDEO_MASK_BY_PROMPT;
    let resp = engine
        .run(op.path, &json!({"video": "v.mp4", "prompt": "dog"}), &CallOptions::new())
        .await
        .unwrap();

    let result = op.parse_result(&resp).unwrap().expect("result");
    match &result {
        OperationResult::Mask(MaskResult { mask_url, .. }) => assert_eq!(*mask_url, file_url),
        other => panic!("expected mask result, got {other:?}"),
    }

    let options = FileWaitOptions::new(Duration::from_millis(10), Duration::from_secs(5));
    engine
        .wait_for_file(result.file_url().unwrap(), &options)
        .await
        .unwrap();
    assert_eq!(checks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unsatisfiable_range_means_an_empty_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(416))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/files/empty.png", server.uri());
    let err = engine_for(&server)
        .wait_for_file(&url, &FileWaitOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BriaError::EmptyFile { status: 416, .. }), "got {err:?}");
}

#[tokio::test]
async fn file_wait_gives_up_on_a_hanging_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let url = format!("{}/files/slow.png", server.uri());
    let options = FileWaitOptions::new(Duration::from_millis(20), Duration::from_millis(200));
    let started = Instant::now();
    let err = engine_for(&server).wait_for_file(&url, &options).await.unwrap_err();

    assert!(matches!(err, BriaError::FileTimeout { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
}
