mod common;

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::{finished, running, MockWorker, SCENARIO_A_REPORT};
use scanctl::config::Config;
use scanctl::server::{router, AppState};
use scanctl::transport::TransportKind;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn status_of(app: &Router) -> Value {
    let (code, body) = send(app, get("/api/status")).await;
    assert_eq!(code, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

async fn wait_for_state(app: &Router, state: &str) -> Value {
    for _ in 0..250 {
        let view = status_of(app).await;
        if view["state"] == state {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("front-end never reported state {state}");
}

fn remote_app(worker: &MockWorker, artifact_dir: &std::path::Path) -> Router {
    let mut config = worker.config();
    config.artifact_dir = artifact_dir.to_path_buf();
    router(AppState::new(TransportKind::Remote, config))
}

#[tokio::test]
async fn idle_front_end() {
    let app = router(AppState::new(TransportKind::Remote, Config::default()));

    let resp = app.clone().oneshot(get("/api/status")).await.unwrap();
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
    let view = status_of(&app).await;
    assert_eq!(view, json!({ "state": "idle", "polls": 0 }));

    let (code, body) = send(&app, get("/api/about")).await;
    assert_eq!(code, StatusCode::OK);
    let about: Value = serde_json::from_slice(&body).unwrap();
    assert!(about["about"].as_str().unwrap().starts_with("scanctl "));

    let (code, _) = send(&app, get("/api/report")).await;
    assert_eq!(code, StatusCode::NO_CONTENT);
    let (code, _) = send(&app, get("/report.html")).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    let (code, _) = send(&app, post_empty("/api/cancel")).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_starting() {
    let app = router(AppState::new(TransportKind::Remote, Config::default()));

    let (code, body) = send(&app, post_json("/api/scan", json!({ "ports": "22" }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8_lossy(&body).contains("no target"));

    let (code, _) = send(
        &app,
        post_json(
            "/api/scan",
            json!({ "cidr": "10.0.0.0/30", "range": "10.0.0.1-10.0.0.2", "ports": "22" }),
        ),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = send(
        &app,
        post_json("/api/scan", json!({ "address": "10.0.0.1", "ports": "0" })),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    assert_eq!(status_of(&app).await["state"], "idle");
}

#[tokio::test]
async fn scan_report_and_html() {
    let worker = MockWorker::spawn(vec![running(1), finished(1)], SCENARIO_A_REPORT).await;
    let dir = tempfile::tempdir().unwrap();
    let app = remote_app(&worker, dir.path());

    let (code, _) = send(
        &app,
        post_json(
            "/api/scan",
            json!({ "range": "10.0.0.1-10.0.0.2", "ports": "22-23", "concurrency": 50 }),
        ),
    )
    .await;
    assert_eq!(code, StatusCode::ACCEPTED);

    let view = wait_for_state(&app, "completed").await;
    assert_eq!(view["hosts"], 1);
    assert_eq!(view["open"], 1);
    assert_eq!(worker.submissions()[0]["concurrency"], 50);

    let (code, body) = send(&app, get("/api/report")).await;
    assert_eq!(code, StatusCode::OK);
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        report["summary"],
        json!([{ "ip": "10.0.0.1", "open_count": 1 }])
    );
    let json_path = report["json_path"].as_str().unwrap();
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
    assert_eq!(saved[0]["ip"], "10.0.0.1");
    let html_path = report["html_path"].as_str().unwrap();
    assert!(std::fs::read_to_string(html_path).unwrap().contains("SSH-2.0"));

    let (code, body) = send(&app, get("/report.html")).await;
    assert_eq!(code, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("Host: 10.0.0.1"));
    assert!(html.contains("Generated: "));
}

#[tokio::test]
async fn second_scan_conflicts_until_cancelled() {
    let worker = MockWorker::spawn(vec![running(0); 1000], "[]").await;
    let dir = tempfile::tempdir().unwrap();
    let app = remote_app(&worker, dir.path());
    let form = json!({ "address": "10.0.0.1", "ports": "22" });

    let (code, _) = send(&app, post_json("/api/scan", form.clone())).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    wait_for_state(&app, "running").await;

    let (code, _) = send(&app, post_json("/api/scan", form.clone())).await;
    assert_eq!(code, StatusCode::CONFLICT);

    let (code, _) = send(&app, post_empty("/api/cancel")).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let view = wait_for_state(&app, "timed_out").await;
    assert_eq!(view["reason"], "cancelled by caller");

    // A finished job frees the front-end for the next one.
    let (code, _) = send(&app, post_json("/api/scan", form)).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    wait_for_state(&app, "running").await;
    assert_eq!(worker.submissions().len(), 2);
}
