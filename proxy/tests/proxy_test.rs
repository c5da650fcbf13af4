use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ollama_proxy::config::Config;
use ollama_proxy::test_util::{create_test_state, generate_test_jwt, test_bearer, test_config};
use ollama_proxy::{app, AppState, Strategy};

async fn mock_backend(reply: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(reply.as_bytes().to_vec(), "application/x-ndjson"),
        )
        .mount(&server)
        .await;
    server
}

fn chat_request(model: &str, auth: Option<&str>) -> Request<Body> {
    let body = json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hello"}],
        "stream": true
    });
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(
    state: &Arc<AppState>,
    request: Request<Body>,
) -> (StatusCode, http::HeaderMap, Vec<u8>) {
    let response = app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn error_type(body: &[u8]) -> String {
    let value: Value = serde_json::from_slice(body).unwrap();
    value["error"]["type"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_chat_is_forwarded_and_slot_released() {
    let backend = mock_backend("{\"done\":true}\n").await;
    let state = create_test_state(test_config(&[&backend.uri()]));

    let request = chat_request("llama3.2", Some(&test_bearer()));
    let (status, headers, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"{\"done\":true}\n");
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/x-ndjson");
    assert_eq!(state.dispatcher.queue_length("server0"), 0);

    let usage = state.dispatcher.registry().usage("server0").unwrap();
    assert_eq!(usage.last_model.as_deref(), Some("llama3.2"));
    assert!(usage.last_seen.is_some());
}

#[tokio::test]
async fn test_blacklisted_model_routed_elsewhere() {
    let first = mock_backend("first").await;
    let second = mock_backend("second").await;
    let mut config = test_config(&[&first.uri(), &second.uri()]);
    config.backends[0].model_black_list = vec!["llama3.2".to_string()];
    let state = create_test_state(config);

    let (status, _, body) = send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"second");

    let (status, _, body) = send(&state, chat_request("mistral", Some(&test_bearer()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"first");
}

#[tokio::test]
async fn test_whitelist_is_exclusive() {
    let first = mock_backend("first").await;
    let second = mock_backend("second").await;
    let mut config = test_config(&[&first.uri(), &second.uri()]);
    config.backends[1].model_white_list = vec!["qwen".to_string()];
    config.backends[0].model_black_list = vec!["qwen".to_string()];
    let state = create_test_state(config);

    let (_, _, body) = send(&state, chat_request("qwen", Some(&test_bearer()))).await;
    assert_eq!(body, b"second");

    let (_, _, body) = send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;
    assert_eq!(body, b"first");
}

#[tokio::test]
async fn test_all_backends_blacklisted() {
    let backend = mock_backend("unused").await;
    let mut config = test_config(&[&backend.uri()]);
    config.backends[0].model_black_list = vec!["llama3.2".to_string()];
    let state = create_test_state(config);

    let (status, _, body) = send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_type(&body), "no_backend_available");
    assert_eq!(state.dispatcher.queue_length("server0"), 0);
}

#[tokio::test]
async fn test_invalid_json_rejected() {
    let backend = mock_backend("unused").await;
    let state = create_test_state(test_config(&[&backend.uri()]));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/generate")
        .header(header::AUTHORIZATION, test_bearer())
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_type(&body), "invalid_request");
}

#[tokio::test]
async fn test_missing_credentials_forbidden() {
    let backend = mock_backend("unused").await;
    let state = create_test_state(test_config(&[&backend.uri()]));

    let (status, _, body) = send(&state, chat_request("llama3.2", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_type(&body), "unauthorized");

    let (status, _, _) = send(&state, chat_request("llama3.2", Some("Bearer alice:wrong"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_jwt_accepted() {
    let backend = mock_backend("ok").await;
    let state = create_test_state(test_config(&[&backend.uri()]));
    let token = generate_test_jwt("carol", Some("carol@example.com"));

    let request = chat_request("llama3.2", Some(&format!("Bearer {}", token)));
    let (status, _, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_admission_timeout_returns_429() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&backend)
        .await;

    let mut config: Config = test_config(&[&backend.uri()]);
    config.scheduler.admission_timeout_ms = 200;
    let state = create_test_state(config);

    let first = {
        let state = state.clone();
        let request = chat_request("llama3.2", Some(&test_bearer()));
        tokio::spawn(async move { send(&state, request).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.dispatcher.queue_length("server0"), 1);

    let request = chat_request("llama3.2", Some(&test_bearer()));
    let (status, headers, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "1");
    assert_eq!(error_type(&body), "admission_timeout");

    let (status, _, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"slow");
    assert_eq!(state.dispatcher.queue_length("server0"), 0);
}

#[tokio::test]
async fn test_waiting_request_admitted_after_release() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("done")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&backend)
        .await;
    let state = create_test_state(test_config(&[&backend.uri()]));

    let first = {
        let state = state.clone();
        let request = chat_request("llama3.2", Some(&test_bearer()));
        tokio::spawn(async move { send(&state, request).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, _, _) = send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first.await.unwrap().0, StatusCode::OK);
    assert_eq!(state.dispatcher.queue_length("server0"), 0);
}

#[tokio::test]
async fn test_backend_error_status_passed_through() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model failed"))
        .mount(&backend)
        .await;
    let state = create_test_state(test_config(&[&backend.uri()]));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/generate")
        .header(header::AUTHORIZATION, test_bearer())
        .body(Body::from(r#"{"model":"llama3.2","prompt":"hi"}"#))
        .unwrap();
    let (status, _, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, b"model failed");
    assert_eq!(state.dispatcher.queue_length("server0"), 0);
    assert!(state.dispatcher.registry().usage("server0").unwrap().last_seen.is_none());
}

#[tokio::test]
async fn test_unreachable_backend_returns_502() {
    let state = create_test_state(test_config(&["http://127.0.0.1:1"]));

    let (status, _, body) = send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(error_type(&body), "backend_error");
    assert_eq!(state.dispatcher.queue_length("server0"), 0);
}

#[tokio::test]
async fn test_unscheduled_path_forwarded() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .expect(1)
        .mount(&backend)
        .await;
    let state = create_test_state(test_config(&[&backend.uri()]));

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/tags")
        .header(header::AUTHORIZATION, test_bearer())
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"models": []}));
    assert_eq!(state.dispatcher.queue_length("server0"), 0);
}

#[tokio::test]
async fn test_unscheduled_path_without_backends() {
    let state = create_test_state(test_config(&[]));

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/tags")
        .header(header::AUTHORIZATION, test_bearer())
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_health_lists_backends() {
    let state = create_test_state(test_config(&["http://127.0.0.1:1", "http://127.0.0.1:2"]));

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["strategy"], "model_affinity");
    assert_eq!(value["backends"][0]["name"], "server0");
    assert_eq!(value["backends"][1]["name"], "server1");
    assert_eq!(value["backends"][1]["queue_length"], 0);
}

#[tokio::test]
async fn test_health_usage_tracked_only_with_affinity() {
    let backend = mock_backend("ok").await;
    let mut config = test_config(&[&backend.uri()]);
    config.scheduler.strategy = Strategy::ShortestQueue;
    let state = create_test_state(config);

    let (status, _, _) = send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (_, _, body) = send(&state, request).await;
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["strategy"], "shortest_queue");
    assert_eq!(value["backends"][0]["queue_length"], 0);
    assert!(value["backends"][0]["last_model"].is_null());
    assert!(value["backends"][0]["last_seen"].is_null());

    let state = create_test_state(test_config(&[&backend.uri()]));
    send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (_, _, body) = send(&state, request).await;
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["backends"][0]["last_model"], "llama3.2");
    assert!(value["backends"][0]["last_seen"].is_string());
}

#[tokio::test]
async fn test_metrics_report_queue_lengths() {
    let state = create_test_state(test_config(&["http://127.0.0.1:1"]));

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, _, body) = send(&state, request).await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("ollama_proxy_up 1"));
    assert!(text.contains("ollama_proxy_queue_length{backend=\"server0\"} 0"));
}

/// Backend that answers one request with `lines` as chunked NDJSON, pausing
/// `gap` before each chunk.
async fn slow_streaming_backend(lines: Vec<String>, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // Read the whole request before answering.
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_lowercase();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  content-type: application/x-ndjson\r\n\
                  transfer-encoding: chunked\r\n\
                  connection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for line in lines {
            tokio::time::sleep(gap).await;
            let chunk = format!("{:x}\r\n{}\r\n", line.len(), line);
            socket.write_all(chunk.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_stream_outlasting_read_timeout_completes() {
    let lines: Vec<String> = (0..5)
        .map(|i| format!("{{\"response\":\"{}\",\"done\":{}}}\n", i, i == 4))
        .collect();
    let backend = slow_streaming_backend(lines.clone(), Duration::from_millis(400)).await;

    let mut config = test_config(&[&backend]);
    config.upstream.read_timeout_secs = 1;
    let state = create_test_state(config);

    let start = std::time::Instant::now();
    let (status, _, body) = send(&state, chat_request("llama3.2", Some(&test_bearer()))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(start.elapsed() > Duration::from_secs(1));
    assert_eq!(String::from_utf8(body).unwrap(), lines.concat());
    assert_eq!(state.dispatcher.queue_length("server0"), 0);

    let usage = state.dispatcher.registry().usage("server0").unwrap();
    assert_eq!(usage.last_model.as_deref(), Some("llama3.2"));
    assert!(usage.last_seen.is_some());
}
