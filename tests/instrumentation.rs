//! Request lifecycle tests for the instrumentation chain.

use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::Extension;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use axum::body::Body;
use futures_util::StreamExt;

use request_telemetry::http::middleware::UNMATCHED_ROUTE;
use request_telemetry::http::{ErrorBody, HttpServer};
use request_telemetry::observability::metrics::{
    DIM_METHOD, DIM_PATH, ERROR_COUNT, LATENCY, REQUEST_COUNT,
};
use request_telemetry::observability::{LogLevel, MetricUnit, SegmentOutcome, TraceContext};
use request_telemetry::Telemetry;

mod common;

use common::{body_string, get as get_request, test_config, Recorders, TestApp};

#[tokio::test]
async fn test_hello_world_is_counted_timed_and_logged() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    let response = app.call(get_request("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(body_string(response).await, "Hello, World!");

    app.flush().await;

    let counts = recorders.points(REQUEST_COUNT);
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].value(), 1.0);
    assert_eq!(counts[0].unit(), MetricUnit::Count);
    assert_eq!(counts[0].dimension(DIM_METHOD), Some("GET"));
    assert_eq!(counts[0].dimension(DIM_PATH), Some("/"));

    let latencies = recorders.points(LATENCY);
    assert_eq!(latencies.len(), 1);
    assert_eq!(latencies[0].unit(), MetricUnit::Milliseconds);
    assert_eq!(latencies[0].dimensions(), counts[0].dimensions());
    assert!(latencies[0].value() >= 0.0);

    assert!(recorders.points(ERROR_COUNT).is_empty());

    let logs = recorders.logs.items();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, LogLevel::Info);
    assert_eq!(logs[0].status, 200);
    assert_eq!(logs[0].method, "GET");
    assert_eq!(logs[0].path, "/");
    assert_eq!(logs[0].request_id.as_deref(), Some(request_id.as_str()));

    let closed = recorders.traces.closed();
    assert_eq!(recorders.traces.opened().len(), 1);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].outcome, SegmentOutcome::Completed { status: 200 });
    assert_eq!(closed[0].segment.service.as_ref(), "demo-api");
    assert_eq!(logs[0].trace_id, closed[0].segment.trace_id);
}

#[tokio::test]
async fn test_deliberate_error_goes_through_error_capture() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    let response = app.call(get_request("/error")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key("x-request-id"));
    let body: ErrorBody = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body.status, "error");
    assert_eq!(body.message, "This is a deliberate error");

    app.flush().await;

    assert_eq!(recorders.points(REQUEST_COUNT).len(), 1);
    assert!(recorders.points(LATENCY).is_empty());
    let errors = recorders.points(ERROR_COUNT);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].unit(), MetricUnit::Count);
    assert_eq!(errors[0].dimension(DIM_METHOD), Some("GET"));
    assert_eq!(errors[0].dimension(DIM_PATH), Some("/error"));

    let logs = recorders.logs.items();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, LogLevel::Error);
    assert_eq!(logs[0].status, 500);
    assert_eq!(logs[0].error.as_deref(), Some("This is a deliberate error"));
    assert_eq!(logs[0].message, "Error: This is a deliberate error");

    let closed = recorders.traces.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].outcome, SegmentOutcome::Failed { status: 500 });
}

#[tokio::test(start_paused = true)]
async fn test_long_running_request_is_not_timed_out() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    let response = app.call(get_request("/long-running")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await,
        "This request took 3 minutes to finish."
    );

    app.flush().await;

    let latencies = recorders.points(LATENCY);
    assert_eq!(latencies.len(), 1);
    let ms = latencies[0].value();
    assert!((180_000.0..181_000.0).contains(&ms), "latency was {}ms", ms);
    assert_eq!(latencies[0].dimension(DIM_PATH), Some("/long-running"));

    let closed = recorders.traces.closed();
    assert_eq!(closed.len(), 1);
    assert!(closed[0].elapsed >= Duration::from_secs(180));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_request_closes_segment_once_and_emits_no_outcome() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    let router = app.app.clone();
    let task = tokio::spawn(async move {
        use tower::ServiceExt;
        router.oneshot(get_request("/long-running")).await
    });

    // Let the request get into its handler, then drop it as a disconnect would.
    tokio::time::sleep(Duration::from_secs(1)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    app.flush().await;

    assert_eq!(recorders.points(REQUEST_COUNT).len(), 1);
    assert!(recorders.points(LATENCY).is_empty());
    assert!(recorders.points(ERROR_COUNT).is_empty());
    assert!(recorders.logs.items().is_empty());

    let closed = recorders.traces.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].outcome, SegmentOutcome::Abandoned);
}

#[tokio::test]
async fn test_panicking_handler_is_captured() {
    async fn explode() -> &'static str {
        panic!("kaboom")
    }

    let recorders = Recorders::new();
    let routes = Router::new().route("/explode", get(explode));
    let mut app = TestApp::with_routes(&test_config(), recorders.sinks(), routes);

    let response = app.call(get_request("/explode")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body.status, "error");
    assert_eq!(body.message, "kaboom");

    app.flush().await;

    assert_eq!(recorders.points(ERROR_COUNT).len(), 1);
    assert!(recorders.points(LATENCY).is_empty());
    assert_eq!(
        recorders.traces.closed()[0].outcome,
        SegmentOutcome::Failed { status: 500 }
    );
}

#[tokio::test]
async fn test_handler_chosen_error_status_is_a_normal_completion() {
    let recorders = Recorders::new();
    let routes = Router::new().route(
        "/unavailable",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later") }),
    );
    let mut app = TestApp::with_routes(&test_config(), recorders.sinks(), routes);

    let response = app.call(get_request("/unavailable")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "try later");

    app.flush().await;

    assert_eq!(recorders.points(LATENCY).len(), 1);
    assert!(recorders.points(ERROR_COUNT).is_empty());
    assert_eq!(recorders.logs.items()[0].status, 503);
}

#[tokio::test]
async fn test_unmatched_path_is_instrumented() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    let response = app.call(get_request("/missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "Not Found");

    app.flush().await;

    let counts = recorders.points(REQUEST_COUNT);
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].dimension(DIM_PATH), Some(UNMATCHED_ROUTE));
    let latencies = recorders.points(LATENCY);
    assert_eq!(latencies.len(), 1);
    assert_eq!(latencies[0].dimension(DIM_PATH), Some(UNMATCHED_ROUTE));

    // The raw path is still visible in the request log.
    let logs = recorders.logs.items();
    assert_eq!(logs[0].path, "/missing");
    assert_eq!(logs[0].status, 404);
}

#[tokio::test]
async fn test_unmatched_urls_share_one_series() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    for i in 0..200 {
        let response = app.call(get_request(&format!("/scan/{}", i))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        body_string(response).await;
    }
    app.flush().await;

    let series: HashSet<_> = recorders
        .metrics
        .items()
        .iter()
        .map(|p| p.dimensions().clone())
        .collect();
    assert_eq!(series.len(), 1);
    assert_eq!(recorders.points(REQUEST_COUNT).len(), 200);
}

#[tokio::test]
async fn test_route_template_is_used_as_path_dimension() {
    let recorders = Recorders::new();
    let routes = Router::new().route("/users/{id}", get(|| async { "user" }));
    let mut app = TestApp::with_routes(&test_config(), recorders.sinks(), routes);

    app.call(get_request("/users/42")).await;
    app.call(get_request("/users/43")).await;
    app.flush().await;

    let counts = recorders.points(REQUEST_COUNT);
    assert_eq!(counts.len(), 2);
    assert!(counts.iter().all(|p| p.dimension(DIM_PATH) == Some("/users/{id}")));
}

#[tokio::test]
async fn test_segment_nests_under_incoming_traceparent() {
    async fn echo_trace(Extension(ctx): Extension<TraceContext>) -> String {
        ctx.trace_id
    }

    let recorders = Recorders::new();
    let routes = Router::new().route("/trace", get(echo_trace));
    let mut app = TestApp::with_routes(&test_config(), recorders.sinks(), routes);

    let request = Request::builder()
        .uri("/trace")
        .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        .header("x-request-id", "caller-supplied")
        .body(Body::empty())
        .unwrap();
    let response = app.call(request).await;
    assert_eq!(response.headers()["x-request-id"], "caller-supplied");
    assert_eq!(body_string(response).await, "4bf92f3577b34da6a3ce929d0e0e4736");

    app.flush().await;

    let opened = recorders.traces.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(opened[0].parent_id.as_deref(), Some("00f067aa0ba902b7"));
    assert_eq!(opened[0].operation, "GET /trace");
    assert_eq!(
        recorders.logs.items()[0].request_id.as_deref(),
        Some("caller-supplied")
    );
}

#[tokio::test(start_paused = true)]
async fn test_latency_covers_streamed_body() {
    async fn stream() -> Body {
        let chunks = futures_util::stream::iter(0..2).then(|i| async move {
            if i == 1 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok::<_, Infallible>(format!("chunk{};", i))
        });
        Body::from_stream(chunks)
    }

    let recorders = Recorders::new();
    let routes = Router::new().route("/stream", get(stream));
    let mut app = TestApp::with_routes(&test_config(), recorders.sinks(), routes);

    let response = app.call(get_request("/stream")).await;
    assert_eq!(response.status(), StatusCode::OK);
    // Headers are ready but the body is still pending: only RequestCount so far.
    assert_eq!(app.telemetry.metrics.snapshot().accepted, 1);
    assert!(recorders.traces.closed().is_empty());

    assert_eq!(body_string(response).await, "chunk0;chunk1;");
    assert_eq!(app.telemetry.metrics.snapshot().accepted, 2);

    app.flush().await;

    let latencies = recorders.points(LATENCY);
    assert_eq!(latencies.len(), 1);
    assert!(latencies[0].value() >= 5000.0, "latency was {}ms", latencies[0].value());
    assert_eq!(
        recorders.traces.closed()[0].outcome,
        SegmentOutcome::Completed { status: 200 }
    );
}

#[tokio::test]
async fn test_unsent_body_abandons_segment() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    let response = app.call(get_request("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    app.flush().await;

    assert_eq!(recorders.points(REQUEST_COUNT).len(), 1);
    assert!(recorders.points(LATENCY).is_empty());
    assert!(recorders.logs.items().is_empty());
    assert_eq!(recorders.traces.closed()[0].outcome, SegmentOutcome::Abandoned);
}

#[tokio::test]
async fn test_head_request_completes_without_body() {
    let recorders = Recorders::new();
    let mut app = TestApp::start(&test_config(), recorders.sinks());

    let request = Request::builder()
        .method("HEAD")
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let response = app.call(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    app.flush().await;

    let latencies = recorders.points(LATENCY);
    assert_eq!(latencies.len(), 1);
    assert_eq!(latencies[0].dimension(DIM_METHOD), Some("HEAD"));
    assert_eq!(
        recorders.traces.closed()[0].outcome,
        SegmentOutcome::Completed { status: 200 }
    );
}

#[tokio::test]
async fn test_telemetry_flows_without_holding_worker_handles() {
    use tower::ServiceExt;

    let config = test_config();
    let recorders = Recorders::new();
    let (telemetry, _) = Telemetry::start(&config, recorders.sinks());
    let router = HttpServer::new(&config, &telemetry).router();

    for _ in 0..3 {
        let response = router.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(body_string(response).await, "Hello, World!");
    }

    let snapshot = telemetry.metrics.snapshot();
    assert_eq!(snapshot.accepted, 6);
    assert_eq!(snapshot.dropped, 0);

    tokio::time::timeout(Duration::from_secs(5), async {
        while recorders.points(REQUEST_COUNT).len() < 3 || recorders.logs.items().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("telemetry was not published");
    assert_eq!(recorders.points(LATENCY).len(), 3);
}
