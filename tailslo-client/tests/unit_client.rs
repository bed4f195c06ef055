use mockito::Matcher;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tailslo_client::{streaming_payload, ClientConfig, StreamingClient, DEFAULT_ENDPOINT};
use tailslo_common::{Completion, SystemClock, TailSloError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// Helper: a client aimed at the given mockito server URL.
fn client_for(server_url: &str) -> StreamingClient {
    StreamingClient::new(ClientConfig::new(server_url))
}

fn payload() -> serde_json::Value {
    json!({"messages": [{"role": "user", "content": "hi"}], "max_tokens": 8, "stream": false})
}

#[test]
fn test_client_config_defaults() {
    let config = ClientConfig::new("http://127.0.0.1:30000");
    assert_eq!(config.base_url, "http://127.0.0.1:30000");
    assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    assert!(config.timeout.is_none());
}

#[test]
fn test_url_joins_base_and_endpoint() {
    let client = client_for("http://127.0.0.1:30000/");
    assert_eq!(client.url(), "http://127.0.0.1:30000/v1/chat/completions");

    let mut config = ClientConfig::new("http://localhost:8000");
    config.endpoint = "/generate".to_string();
    assert_eq!(StreamingClient::new(config).url(), "http://localhost:8000/generate");
}

#[test]
fn test_streaming_payload_does_not_mutate_caller_copy() {
    let original = payload();
    let body = streaming_payload(&original).unwrap();
    assert_eq!(body["stream"], json!(true));
    assert_eq!(original["stream"], json!(false));
    assert_eq!(body["max_tokens"], json!(8));
}

#[test]
fn test_streaming_payload_rejects_non_objects() {
    assert!(matches!(streaming_payload(&json!([1, 2])), Err(TailSloError::InvalidPayload(_))));
    assert!(matches!(streaming_payload(&json!("text")), Err(TailSloError::InvalidPayload(_))));
}

#[tokio::test]
async fn test_stream_with_sentinel() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(|w| {
            w.write_all(b": ping\n\n")?;
            w.write_all(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n")?;
            std::thread::sleep(Duration::from_millis(50));
            w.write_all(b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n")?;
            w.write_all(b"data: [DONE]\n\n")
        })
        .create_async()
        .await;

    let client = client_for(&server.url());
    let http = reqwest::Client::new();
    let clock = SystemClock::new();
    let record = client.generate_stream(5, &payload(), &http, &clock).await.expect("stream failed");

    mock.assert_async().await;
    assert_eq!(record.req_id, 5);
    assert_eq!(record.completion, Completion::Sentinel);
    assert!(record.ttft_s() >= 0.0);
    assert!(record.ttft_s() <= record.e2e_s());
    assert!(record.e2e_s() >= 0.04, "e2e should include the inter-chunk pause: {}", record.e2e_s());
}

#[tokio::test]
async fn test_stream_closed_without_sentinel_is_a_record() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_chunked_body(|w| w.write_all(b"data: {\"token\":\"a\"}\n\ndata: {\"token\":\"b\"}"))
        .create_async()
        .await;

    let client = client_for(&server.url());
    let record = client
        .generate_stream(1, &payload(), &reqwest::Client::new(), &SystemClock::new())
        .await
        .expect("clean EOF should not be an error");

    assert_eq!(record.completion, Completion::Eof);
    assert!(record.first_ts < record.last_ts || record.first_ts == record.last_ts);
    assert!(record.ttft_s() <= record.e2e_s());
}

/// Serve one chunked 200 response carrying a single data frame, then drop the
/// connection before the terminating zero-length chunk.
async fn serve_truncated_stream(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.unwrap();
    read_request(&mut socket).await;

    let frame = "data: {\"token\":\"a\"}\n\n";
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{frame}\r\n",
        frame.len()
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Consume the request head and its `content-length` body so closing the socket sends FIN, not RST.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending the request");
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else { continue };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map(|v| v.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        if buf.len() >= end + 4 + body_len {
            return;
        }
    }
}

#[tokio::test]
async fn test_connection_dropped_mid_stream_is_stream_aborted() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_truncated_stream(listener));

    let client = client_for(&format!("http://{addr}"));
    let result = client
        .generate_stream(3, &payload(), &reqwest::Client::new(), &SystemClock::new())
        .await;
    server.await.unwrap();

    assert!(matches!(result, Err(TailSloError::StreamAborted(_))), "got {result:?}");
}

#[tokio::test]
async fn test_non_streamed_response_has_equal_ttft_and_e2e() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":"whole answer"}}]}"#)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let record = client
        .generate_stream(0, &payload(), &reqwest::Client::new(), &SystemClock::new())
        .await
        .expect("non-streamed body should degrade, not fail");

    assert_eq!(record.first_ts, record.last_ts);
    assert_eq!(record.ttft_s(), record.e2e_s());
    assert_eq!(record.completion, Completion::Eof);
}

#[tokio::test]
async fn test_error_status_fails_the_request() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(503)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"overloaded"}"#)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let result = client.generate_stream(0, &payload(), &reqwest::Client::new(), &SystemClock::new()).await;
    assert_eq!(result, Err(TailSloError::HttpError(503, "overloaded".to_string())));
}

#[tokio::test]
async fn test_error_status_without_envelope() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(400)
        .with_body("bad request")
        .create_async()
        .await;

    let client = client_for(&server.url());
    let result = client.generate_stream(0, &payload(), &reqwest::Client::new(), &SystemClock::new()).await;
    assert!(matches!(result, Err(TailSloError::HttpError(400, msg)) if msg.contains("400")));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = client_for(&format!("http://127.0.0.1:{port}"));
    let result = client.generate_stream(0, &payload(), &reqwest::Client::new(), &SystemClock::new()).await;
    assert!(matches!(result, Err(TailSloError::NetworkError(_))));
}

#[tokio::test]
async fn test_timeout_fails_the_request() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_chunked_body(|w| {
            w.write_all(b"data: {\"token\":\"a\"}\n\n")?;
            std::thread::sleep(Duration::from_secs(2));
            w.write_all(b"data: [DONE]\n\n")
        })
        .create_async()
        .await;

    let mut config = ClientConfig::new(server.url());
    config.timeout = Some(Duration::from_millis(300));
    let client = StreamingClient::new(config);
    let result = client.generate_stream(0, &payload(), &reqwest::Client::new(), &SystemClock::new()).await;
    assert!(
        matches!(result, Err(TailSloError::Timeout) | Err(TailSloError::StreamAborted(_))),
        "expected a timeout failure, got {result:?}"
    );
}

#[tokio::test]
async fn test_invalid_payload_is_rejected_before_sending() {
    let client = client_for("http://127.0.0.1:9");
    let result = client
        .generate_stream(0, &json!(null), &reqwest::Client::new(), &SystemClock::new())
        .await;
    assert!(matches!(result, Err(TailSloError::InvalidPayload(_))));
}
