// End-to-end tests for the HTTP API and the SSE event stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path as UrlPath;
use axum::http::StatusCode as AxumStatus;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use bulk_dl_engine::config::EngineConfig;
use bulk_dl_engine::engine::manager::SessionManager;
use bulk_dl_engine::server::handler::ApiServer;
use bulk_dl_engine::source::http_source::HttpBulkDownloader;

async fn serve_file(UrlPath(name): UrlPath<String>) -> impl IntoResponse {
    format!("payload {}", name)
}

async fn serve_slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(30)).await;
    (AxumStatus::OK, "too late")
}

async fn start_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/files/{name}", get(serve_file))
        .route("/slow/{name}", get(serve_slow));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start_api() -> ApiServer {
    let config = EngineConfig {
        max_retries: 0,
        read_timeout_secs: 60,
        ..EngineConfig::default()
    };
    let downloader = Arc::new(HttpBulkDownloader::new(&config).unwrap());
    let manager = Arc::new(SessionManager::new(downloader));
    ApiServer::start(manager, "127.0.0.1:0").await.unwrap()
}

/// Incremental reader over an SSE response, yielding parsed `data:` frames.
struct SseReader {
    resp: reqwest::Response,
    buffer: String,
}

impl SseReader {
    async fn connect(server: &ApiServer) -> Self {
        let resp = reqwest::get(server.url("/api/events")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"), "{}", content_type);
        Self {
            resp,
            buffer: String::new(),
        }
    }

    async fn next_frame(&mut self) -> Value {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let data: Vec<&str> = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    // keep-alive comment
                    continue;
                }
                return serde_json::from_str(&data.join("\n")).unwrap();
            }
            let chunk = self.resp.chunk().await.unwrap().expect("event stream closed");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Read frames until one of `kind` for `session` arrives, returning every frame seen.
    async fn until_kind(&mut self, session: &str, kind: &str) -> Vec<Value> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.next_frame()).await {
                Ok(frame) => frame,
                Err(_) => panic!("no {} event for {}; saw {:?}", kind, session, seen_kinds(&seen)),
            };
            let done = frame["sessionId"] == session && frame["kind"] == kind;
            seen.push(frame);
            if done {
                return seen;
            }
        }
    }
}

fn seen_kinds(frames: &[Value]) -> Vec<String> {
    frames.iter().map(|f| f["kind"].to_string()).collect()
}

async fn create(client: &reqwest::Client, server: &ApiServer, body: Value) -> reqwest::Response {
    client
        .post(server.url("/api/sessions"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let upstream = start_upstream().await;
    let server = start_api().await;
    let client = reqwest::Client::new();
    let mut events = SseReader::connect(&server).await;
    let out = tempfile::tempdir().unwrap();

    let resp = create(
        &client,
        &server,
        json!({
            "target": format!("http://{}/files", upstream),
            "outputPath": out.path().join("batch"),
            "config": { "files": ["one.txt", "two.txt"], "concurrency": 2 }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let frames = events.until_kind(&session_id, "completed").await;
    assert!(frames.iter().any(|f| f["kind"] == "log"));
    let terminal = frames.last().unwrap();
    assert!(terminal["payload"].is_string());

    for name in ["one.txt", "two.txt"] {
        let text = std::fs::read_to_string(out.path().join("batch").join(name)).unwrap();
        assert_eq!(text, format!("payload {}", name));
    }

    let list: Value = client
        .get(server.url("/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["sessions"], json!([]));

    let status = client
        .get(server.url(&format!("/api/sessions/{}", session_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::NOT_FOUND);

    server.shutdown();
}

#[tokio::test]
async fn test_create_without_target_is_bad_request() {
    let server = start_api().await;
    let client = reqwest::Client::new();

    let resp = create(&client, &server, json!({ "outputPath": "/tmp/x" })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("target"));

    let resp = create(&client, &server, json!({ "target": "http://h/x", "outputPath": "  " })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    server.shutdown();
}

#[tokio::test]
async fn test_cancel_unknown_session_is_not_found() {
    let server = start_api().await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(server.url("/api/sessions/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));

    server.shutdown();
}

#[tokio::test]
async fn test_cancel_running_session() {
    let upstream = start_upstream().await;
    let server = start_api().await;
    let client = reqwest::Client::new();
    let mut events = SseReader::connect(&server).await;
    let out = tempfile::tempdir().unwrap();

    let resp = create(
        &client,
        &server,
        json!({
            "target": format!("http://{}/slow/big.iso", upstream),
            "outputPath": out.path(),
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    // The session is visible while its request hangs upstream.
    let status: Value = client
        .get(server.url(&format!("/api/sessions/{}", session_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["sessionId"], session_id.as_str());

    let cancel_url = server.url(&format!("/api/sessions/{}", session_id));
    let resp = client.delete(&cancel_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["cancelled"], true);

    let resp = client.delete(&cancel_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let frames = events.until_kind(&session_id, "cancelled").await;
    assert!(frames
        .iter()
        .all(|f| f["kind"] != "completed" && f["kind"] != "failed"));
    assert!(!out.path().join("big.iso").exists());

    server.shutdown();
}

#[tokio::test]
async fn test_validate_path_endpoint() {
    let server = start_api().await;
    let client = reqwest::Client::new();
    let dir = tempfile::tempdir().unwrap();

    let ok: Value = client
        .get(server.url("/api/validate-path"))
        .query(&[("path", dir.path().to_str().unwrap())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ok["valid"], true);
    assert_eq!(ok["isDirectory"], true);

    let missing = dir.path().join("a").join("b");
    let bad: Value = client
        .get(server.url("/api/validate-path"))
        .query(&[("path", missing.to_str().unwrap())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bad["valid"], false);
    assert_eq!(bad["parentExists"], false);

    let empty: Value = client
        .get(server.url("/api/validate-path"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty["valid"], false);

    server.shutdown();
}
