use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use kairelay_ai::{MockLlmClient, MockStep};
use kairelay_server::config::ServerConfig;
use kairelay_server::relay::ConnectFailurePolicy;
use kairelay_server::{AppState, router};
use serde_json::Value;
use tower::ServiceExt;

fn app_with(mock: MockLlmClient, configure: impl FnOnce(&mut ServerConfig)) -> Router {
    let mut config = ServerConfig::default();
    config.demo.token_delay_ms = 0;
    configure(&mut config);

    let state = AppState::with_upstream(&config, Arc::new(mock)).expect("state builds");
    router(state)
}

fn app(mock: MockLlmClient) -> Router {
    app_with(mock, |_| {})
}

async fn post(app: Router, uri: &str, body: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Read every data frame. The flag is true when the body ended abnormally.
async fn read_frames(response: Response) -> (Vec<String>, bool) {
    let mut body = response.into_body();
    let mut frames = Vec::new();

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    frames.push(String::from_utf8(data.to_vec()).unwrap());
                }
            }
            Err(_) => return (frames, true),
        }
    }
    (frames, false)
}

async fn read_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn delta_frame(delta: &str) -> String {
    format!(
        "data: {{\"event\":\"response.output_text.delta\",\"data\":{{\"delta\":\"{delta}\"}}}}\n\n"
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_upstream() {
    let mock = MockLlmClient::from_steps("mock", vec![MockStep::text_delta("A")]);
    let stats = mock.stats();
    let app = app(mock);

    for body in ["", "not json", "{}", r#"{"message":""}"#, r#"{"message":7}"#] {
        let response = post(app.clone(), "/api/relay", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body:?}");
        assert_eq!(
            read_json(response).await,
            serde_json::json!({ "error": "Message is required" })
        );
    }

    assert_eq!(stats.streams_opened(), 0);
}

#[tokio::test]
async fn test_relay_sets_sse_headers() {
    let app = app(MockLlmClient::from_steps("mock", vec![MockStep::text_delta("A")]));
    let response = post(app, "/api/relay", r#"{"message":"hi"}"#).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers[header::CONNECTION], "keep-alive");
    assert_eq!(headers["x-accel-buffering"], "no");
}

#[tokio::test]
async fn test_relay_forwards_events_in_order_then_done() {
    let mock = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::text_delta("A"),
            MockStep::text_delta("B"),
            MockStep::text_delta("C"),
        ],
    );
    let stats = mock.stats();

    let response = post(app(mock), "/api/relay", r#"{"message":"hi"}"#).await;
    let (frames, aborted) = read_frames(response).await;

    assert!(!aborted);
    assert_eq!(
        frames,
        vec![
            delta_frame("A"),
            delta_frame("B"),
            delta_frame("C"),
            "data: [DONE]\n\n".to_string(),
        ]
    );
    assert_eq!(stats.streams_opened(), 1);
    assert!(wait_for(|| stats.streams_released() == 1).await);
}

#[tokio::test]
async fn test_events_arrive_before_upstream_finishes() {
    let mock = MockLlmClient::from_steps(
        "mock",
        vec![MockStep::text_delta("first"), MockStep::stall()],
    );

    let response = post(app(mock), "/api/relay", r#"{"message":"hi"}"#).await;
    let mut body = response.into_body();

    let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
        .await
        .expect("first event is flushed while upstream is still open")
        .expect("body has a frame")
        .expect("frame is ok");
    let data = frame.into_data().expect("data frame");
    assert_eq!(data, delta_frame("first").as_bytes());
}

#[tokio::test]
async fn test_upstream_error_aborts_without_done() {
    let mock = MockLlmClient::from_steps(
        "mock",
        vec![MockStep::text_delta("A"), MockStep::error("connection reset")],
    );
    let stats = mock.stats();

    let response = post(app(mock), "/api/relay", r#"{"message":"hi"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    let (frames, aborted) = read_frames(response).await;

    assert!(aborted);
    assert_eq!(frames, vec![delta_frame("A")]);
    assert!(wait_for(|| stats.streams_released() == 1).await);
}

#[tokio::test(start_paused = true)]
async fn test_idle_upstream_is_failed() {
    let mock = MockLlmClient::from_steps(
        "mock",
        vec![MockStep::text_delta("A"), MockStep::stall()],
    );
    let stats = mock.stats();
    let app = app_with(mock, |config| config.relay.idle_timeout_secs = 5);

    let response = post(app, "/api/relay", r#"{"message":"hi"}"#).await;
    let (frames, aborted) = read_frames(response).await;

    assert!(aborted);
    assert_eq!(frames, vec![delta_frame("A")]);
    assert!(frames.iter().all(|frame| !frame.contains("[DONE]")));
    assert!(wait_for(|| stats.streams_released() == 1).await);
}

#[tokio::test]
async fn test_client_disconnect_releases_upstream() {
    let mock = MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::text_delta("A"),
            MockStep::text_delta("B").with_delay(60_000),
            MockStep::text_delta("C"),
        ],
    );
    let stats = mock.stats();

    let response = post(app(mock), "/api/relay", r#"{"message":"hi"}"#).await;
    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert_eq!(first, delta_frame("A").as_bytes());

    drop(body);

    assert!(wait_for(|| stats.streams_released() == 1).await);
    assert_eq!(stats.events_yielded(), 1);
}

#[tokio::test]
async fn test_connect_failure_rejects_by_default() {
    let mock = MockLlmClient::new("mock").with_connect_error("connection refused");

    let response = post(app(mock), "/api/relay", r#"{"message":"hi"}"#).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = read_json(response).await;
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("connection refused"), "{error}");
}

#[tokio::test]
async fn test_connect_failure_degrades_to_apology() {
    let mock = MockLlmClient::new("mock").with_connect_error("connection refused");
    let app = app_with(mock, |config| {
        config.relay.on_connect_failure = ConnectFailurePolicy::Degrade;
        config.relay.fallback_message = Some("Sorry, try again".to_string());
    });

    let response = post(app, "/api/relay", r#"{"message":"hi"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let (frames, aborted) = read_frames(response).await;
    assert!(!aborted);
    assert_eq!(
        frames,
        vec![
            delta_frame("Sorry, try again"),
            "data: [DONE]\n\n".to_string()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_hanging_upstream_open_is_rejected_in_bounded_time() {
    let mock = MockLlmClient::new("mock").with_stalled_open();
    let stats = mock.stats();
    let app = app_with(mock, |config| config.relay.open_timeout_secs = 5);

    let response = tokio::time::timeout(
        Duration::from_secs(60),
        post(app, "/api/relay", r#"{"message":"hi"}"#),
    )
    .await
    .expect("relay answers while the upstream open hangs");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("did not answer"));
    assert_eq!(stats.streams_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_upstream_open_degrades_to_apology() {
    let mock = MockLlmClient::new("mock").with_stalled_open();
    let app = app_with(mock, |config| {
        config.relay.open_timeout_secs = 5;
        config.relay.on_connect_failure = ConnectFailurePolicy::Degrade;
        config.relay.fallback_message = Some("Sorry, try again".to_string());
    });

    let response = tokio::time::timeout(
        Duration::from_secs(60),
        post(app, "/api/relay", r#"{"message":"hi"}"#),
    )
    .await
    .expect("relay answers while the upstream open hangs");
    assert_eq!(response.status(), StatusCode::OK);

    let (frames, aborted) = read_frames(response).await;
    assert!(!aborted);
    assert_eq!(
        frames,
        vec![
            delta_frame("Sorry, try again"),
            "data: [DONE]\n\n".to_string()
        ]
    );
}

#[tokio::test]
async fn test_concurrent_relays_are_independent() {
    let fast = MockLlmClient::from_steps(
        "mock",
        vec![MockStep::text_delta("x"), MockStep::text_delta("y")],
    );
    let stats = fast.stats();
    let app = app(fast);

    let (a, b) = tokio::join!(
        post(app.clone(), "/api/relay", r#"{"message":"one"}"#),
        post(app.clone(), "/api/relay", r#"{"message":"two"}"#),
    );

    let (left, right) = tokio::join!(read_frames(a), read_frames(b));
    assert_eq!(left, right);
    assert_eq!(left.0.len(), 3);
    assert_eq!(stats.streams_opened(), 2);
}

#[tokio::test]
async fn test_completion_falls_through_to_next_model() {
    let mock = MockLlmClient::new("mock")
        .with_failing_models(["m1"])
        .with_completion_text("hello there");
    let stats = mock.stats();
    let app = app_with(mock, |config| {
        config.completion.models = vec!["m1".to_string(), "m2".to_string()];
    });

    let response = post(app, "/api/completion", r#"{"message":"hi"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["response"], "hello there");
    assert_eq!(body["model"], "m2");
    assert!(body.get("error").is_none());
    assert_eq!(stats.completions(), 2);
}

#[tokio::test]
async fn test_completion_answers_fallback_when_all_models_fail() {
    let mock = MockLlmClient::new("mock").with_failing_models(["m1", "m2"]);
    let app = app_with(mock, |config| {
        config.completion.models = vec!["m1".to_string(), "m2".to_string()];
        config.completion.fallback_response = Some("canned".to_string());
    });

    let response = post(app, "/api/completion", r#"{"message":"hi"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["response"], "canned");
    assert_eq!(body["model"], "fallback");
    assert!(body["error"].as_str().unwrap().contains("m2"));
}

#[tokio::test]
async fn test_completion_requires_message() {
    let response = post(app(MockLlmClient::new("mock")), "/api/completion", "{}").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "Message is required");
}

#[tokio::test]
async fn test_demo_stream_spells_greeting() {
    for method in ["GET", "POST"] {
        let app = app(MockLlmClient::new("unused"));
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/api/relay/test")
                    .body(Body::from(r#"{"anything":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (frames, aborted) = read_frames(response).await;
        assert!(!aborted);
        assert_eq!(frames.len(), 14, "{method}");

        let text: String = frames[..12]
            .iter()
            .map(|frame| {
                let json: Value =
                    serde_json::from_str(frame.trim_start_matches("data: ").trim_end()).unwrap();
                assert_eq!(json["event"], "response.output_text.delta");
                json["data"]["delta"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(text, "Hello world, this is a streaming test. Working now?");
        assert!(frames[12].contains("\"event\":\"response.completed\""));
        assert_eq!(frames[13], "data: [DONE]\n\n");
    }
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = app(MockLlmClient::new("mock-model"));

    let response = get(app.clone(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, serde_json::json!({ "status": "ok" }));

    let response = get(app, "/api/upstream/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["provider"], "mock");
    assert_eq!(body["model"], "mock-model");
}
