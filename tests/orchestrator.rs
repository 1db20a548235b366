use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use reqwest::{header::HeaderMap, StatusCode};
use retry_fetch::{
    AbortController, AbortSource, Client, DecodedBody, FetchError, FetchOptions, RequestSpec,
    Response, ResponseKind, RetryConfig, StatusErrorCode, Transport, TransportError,
    ValidateStatus,
};
use serde_json::json;
use tokio::time::Instant;

#[derive(Clone, Debug)]
enum Step {
    Respond(u16, &'static str),
    Fail,
    Hang,
}

/// Replays a fixed script, one step per call. Calls past the end fail.
#[derive(Clone)]
struct Scripted {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for Scripted {
    fn send(
        &self,
        request: &RequestSpec,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .expect("script mutex must not be poisoned")
            .pop_front()
            .unwrap_or(Step::Fail);
        let url = request.url.clone();

        async move {
            match step {
                Step::Respond(status, body) => Ok(Response::from_parts(
                    StatusCode::from_u16(status).expect("scripted status must be valid"),
                    url,
                    HeaderMap::new(),
                    body.as_bytes().to_vec(),
                )),
                Step::Fail => Err(TransportError::other("connection reset by peer")),
                Step::Hang => std::future::pending().await,
            }
        }
    }
}

fn client(script: &Scripted) -> Client<Scripted> {
    Client::with_transport(script.clone())
}

const TARGET: &str = "http://mock.test/resource";

#[tokio::test(start_paused = true)]
async fn single_attempt_without_retry_config() {
    let script = Scripted::new([Step::Fail, Step::Respond(200, "{}")]);

    let err = client(&script)
        .fetch(TARGET, FetchOptions::new())
        .expect("options are valid")
        .await
        .expect_err("the only attempt fails");

    assert!(matches!(err, FetchError::Transport(TransportError::Other(_))));
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_make_max_plus_one_attempts() {
    let script = Scripted::new([Step::Fail, Step::Fail, Step::Fail, Step::Fail]);
    let started = Instant::now();

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new().retry(RetryConfig::new(3, 1_000)),
        )
        .expect("options are valid")
        .await
        .expect_err("every attempt fails");

    assert!(matches!(err, FetchError::Transport(_)));
    assert_eq!(script.calls(), 4);
    // Linear backoff: 1s + 2s + 3s.
    assert!(started.elapsed() >= Duration::from_millis(6_000));
    assert!(started.elapsed() < Duration::from_millis(7_000));
}

#[tokio::test(start_paused = true)]
async fn recovers_after_transient_failures() {
    let script = Scripted::new([
        Step::Fail,
        Step::Fail,
        Step::Respond(200, r#"{"name":"lucas","age":40}"#),
    ]);

    let value = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .retry(RetryConfig::new(3, 100))
                .response_kind(ResponseKind::Json),
        )
        .expect("options are valid")
        .await
        .expect("third attempt succeeds")
        .into_json_value()
        .expect("json kind yields a json value");

    assert_eq!(value, json!({"name": "lucas", "age": 40}));
    assert_eq!(script.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn validation_failures_are_never_retried() {
    let script = Scripted::new([Step::Respond(503, "{}"), Step::Respond(200, "{}")]);

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .retry(RetryConfig::new(3, 100))
                .validate_status(ValidateStatus::Ok),
        )
        .expect("options are valid")
        .await
        .expect_err("503 must be rejected");

    let FetchError::Status(status) = err else {
        panic!("expected a status error");
    };
    assert_eq!(status.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(status.code, Some(StatusErrorCode::BadResponse));
    assert!(status.body.is_none());
    assert!(status.response.is_some(), "raw response kept without a kind");
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_json_body_is_attached_to_the_error() {
    let script = Scripted::new([Step::Respond(400, r#"{"error":"missing name"}"#)]);

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .validate_status(ValidateStatus::Ok)
                .response_kind(ResponseKind::Json),
        )
        .expect("options are valid")
        .await
        .expect_err("400 must be rejected");

    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    let FetchError::Status(status) = err else {
        panic!("expected a status error");
    };
    assert_eq!(status.code, Some(StatusErrorCode::BadRequest));
    assert_eq!(
        status.body,
        Some(DecodedBody::Json(json!({"error": "missing name"})))
    );
}

#[tokio::test(start_paused = true)]
async fn exact_status_rule_accepts_only_that_status() {
    let script = Scripted::new([Step::Respond(201, "created")]);

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .validate_status(200u16)
                .response_kind(ResponseKind::Text),
        )
        .expect("options are valid")
        .await
        .expect_err("201 is not 200");

    let FetchError::Status(status) = err else {
        panic!("expected a status error");
    };
    assert_eq!(status.code, None);
    assert_eq!(status.body, Some(DecodedBody::Text("created".to_owned())));
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempts_are_retried_then_reported() {
    let script = Scripted::new([Step::Hang, Step::Hang]);

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .timeout_ms(1)
                .retry(RetryConfig::new(1, 0)),
        )
        .expect("options are valid")
        .await
        .expect_err("target never answers");

    assert!(matches!(err, FetchError::Timeout { timeout_ms: 1 }));
    assert!(err.is_timeout());
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_then_success() {
    let script = Scripted::new([Step::Hang, Step::Respond(200, "pong")]);

    let text = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .timeout_ms(50)
                .retry(RetryConfig::new(2, 10))
                .response_kind(ResponseKind::Text),
        )
        .expect("options are valid")
        .await
        .expect("second attempt answers")
        .into_text();

    assert_eq!(text.as_deref(), Some("pong"));
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn decode_failures_on_success_are_terminal() {
    let script = Scripted::new([Step::Respond(200, "<html>"), Step::Respond(200, "{}")]);

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .retry(RetryConfig::new(3, 0))
                .response_kind(ResponseKind::Json),
        )
        .expect("options are valid")
        .await
        .expect_err("body is not json");

    assert!(matches!(err, FetchError::Transport(TransportError::Json(_))));
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn already_aborted_external_signal_sends_nothing() {
    let script = Scripted::new([Step::Respond(200, "{}")]);
    let external = AbortController::new();
    external.abort();

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .signal(external.signal())
                .retry(RetryConfig::new(3, 0)),
        )
        .expect("options are valid")
        .await
        .expect_err("signal already fired");

    assert!(matches!(
        err,
        FetchError::Aborted {
            origin: AbortSource::Signal
        }
    ));
    assert_eq!(script.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn external_abort_of_a_slow_attempt_is_not_retried() {
    let script = Scripted::new([Step::Hang, Step::Respond(200, "{}")]);
    let external = AbortController::new();
    let fetch = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .signal(external.signal())
                .timeout_ms(1_000)
                .retry(RetryConfig::new(1, 0)),
        )
        .expect("options are valid");

    let task = tokio::spawn(fetch);
    tokio::time::sleep(Duration::from_millis(100)).await;
    external.abort();

    let err = task
        .await
        .expect("fetch task must not panic")
        .expect_err("caller aborted the attempt");
    assert!(matches!(
        err,
        FetchError::Aborted {
            origin: AbortSource::Signal
        }
    ));
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_before_first_poll_settles_as_aborted() {
    let script = Scripted::new([Step::Respond(200, "{}")]);

    let fetch = client(&script)
        .fetch(TARGET, FetchOptions::new())
        .expect("options are valid");
    fetch.abort();
    let err = fetch.await.expect_err("aborted before sending");

    assert!(matches!(
        err,
        FetchError::Aborted {
            origin: AbortSource::Controller
        }
    ));
    assert_eq!(script.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn aborting_the_current_controller_stops_a_hanging_attempt() {
    let script = Scripted::new([Step::Hang, Step::Respond(200, "{}")]);
    let fetch = client(&script)
        .fetch(TARGET, FetchOptions::new().retry(RetryConfig::new(3, 0)))
        .expect("options are valid");
    let slot = fetch.controller_slot();

    let task = tokio::spawn(fetch);
    tokio::time::sleep(Duration::from_millis(100)).await;
    slot.current().abort();

    let err = task
        .await
        .expect("fetch task must not panic")
        .expect_err("aborted mid-attempt");
    assert!(matches!(
        err,
        FetchError::Aborted {
            origin: AbortSource::Controller
        }
    ));
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_during_backoff_prevents_further_attempts() {
    let script = Scripted::new([Step::Fail, Step::Respond(200, "{}")]);
    let fetch = client(&script)
        .fetch(TARGET, FetchOptions::new().retry(RetryConfig::new(3, 10_000)))
        .expect("options are valid");
    let slot = fetch.controller_slot();

    let task = tokio::spawn(fetch);
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(script.calls(), 1);
    slot.current().abort();

    let err = task
        .await
        .expect("fetch task must not panic")
        .expect_err("aborted while waiting");
    assert!(err.is_aborted());
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn external_abort_during_backoff_reports_the_signal() {
    let script = Scripted::new([Step::Fail, Step::Respond(200, "{}")]);
    let external = AbortController::new();
    let fetch = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .controller(external.clone())
                .retry(RetryConfig::new(3, 10_000)),
        )
        .expect("options are valid");

    let task = tokio::spawn(fetch);
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    external.abort();

    let err = task
        .await
        .expect("fetch task must not panic")
        .expect_err("aborted while waiting");
    assert!(matches!(
        err,
        FetchError::Aborted {
            origin: AbortSource::Signal
        }
    ));
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn each_retry_gets_a_fresh_controller() {
    let script = Scripted::new([Step::Fail, Step::Fail, Step::Respond(200, "done")]);
    let fetch = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .retry(RetryConfig::new(3, 1_000))
                .response_kind(ResponseKind::Text),
        )
        .expect("options are valid");
    let slot = fetch.controller_slot();
    let first = fetch.controller();

    // Attempts start at t=0, t=1s and t=3s.
    let task = tokio::spawn(fetch);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(slot.current().same_as(&first));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let second = slot.current();
    assert!(!second.same_as(&first));
    // A superseded controller no longer governs anything.
    first.abort();

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    let third = slot.current();
    assert!(!third.same_as(&second));
    assert!(!third.same_as(&first));

    let text = task
        .await
        .expect("fetch task must not panic")
        .expect("third attempt succeeds")
        .into_text();
    assert_eq!(text.as_deref(), Some("done"));
    assert_eq!(script.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn predicate_that_aborts_the_external_controller_cancels() {
    let script = Scripted::new([Step::Respond(200, "{}"), Step::Respond(200, "{}")]);
    let external = AbortController::new();
    let trigger = external.clone();

    let err = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .controller(external)
                .retry(RetryConfig::new(3, 0))
                .validate_status(ValidateStatus::predicate(move |_| {
                    trigger.abort();
                    true
                })),
        )
        .expect("options are valid")
        .await
        .expect_err("predicate aborted the request");

    assert!(matches!(
        err,
        FetchError::Aborted {
            origin: AbortSource::Signal
        }
    ));
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_after_settlement_is_a_no_op() {
    let script = Scripted::new([Step::Respond(204, "")]);
    let fetch = client(&script)
        .fetch(TARGET, FetchOptions::new())
        .expect("options are valid");
    let slot = fetch.controller_slot();

    let response = fetch
        .await
        .expect("request succeeds")
        .into_response()
        .expect("no kind yields the raw response");
    slot.current().abort();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.ok());
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn aborts_after_the_response_was_read_leave_the_outcome_alone() {
    let script = Scripted::new([Step::Fail, Step::Respond(200, "kept")]);
    let external = AbortController::new();
    let fetch = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .controller(external.clone())
                .retry(RetryConfig::new(1, 10)),
        )
        .expect("options are valid");
    let slot = fetch.controller_slot();
    let first = fetch.controller();

    let response = fetch
        .await
        .expect("second attempt succeeds")
        .into_response()
        .expect("no kind yields the raw response");
    let last = slot.current();
    assert!(!last.same_as(&first));

    last.abort();
    external.abort();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.expect("body must stay readable"),
        "kept"
    );
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_timeout_is_accepted() {
    let script = Scripted::new([Step::Respond(200, "fine")]);

    let text = client(&script)
        .fetch(
            TARGET,
            FetchOptions::new()
                .timeout_ms(u64::MAX)
                .response_kind(ResponseKind::Text),
        )
        .expect("options are valid")
        .await
        .expect("timeout never fires")
        .into_text();

    assert_eq!(text.as_deref(), Some("fine"));
}
