#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use scanctl::config::{Config, ControllerConfig, RemoteConfig};
use scanctl::controller::JobEvent;
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const SCENARIO_A_REPORT: &str =
    r#"[{"ip":"10.0.0.1","ports":[{"port":22,"open":true,"banner":"SSH-2.0"}]}]"#;

/// Scripted reply for one `GET /status` call.
#[derive(Debug, Clone)]
pub enum StatusReply {
    Code(u16),
    Body(Value),
}

pub fn running(hosts: u64) -> StatusReply {
    StatusReply::Body(json!({ "running": true, "startedAt": "2024-05-01T12:00:00Z", "hosts": hosts }))
}

pub fn finished(hosts: u64) -> StatusReply {
    StatusReply::Body(json!({
        "running": false,
        "startedAt": "2024-05-01T12:00:00Z",
        "doneAt": "2024-05-01T12:00:05Z",
        "hosts": hosts
    }))
}

#[derive(Debug)]
struct MockInner {
    scan_status: u16,
    statuses: VecDeque<StatusReply>,
    report_status: u16,
    report_body: String,
    submissions: Vec<Value>,
    status_calls: usize,
    report_calls: usize,
}

/// In-process stand-in for the remote scan service.
#[derive(Clone)]
pub struct MockWorker {
    inner: Arc<Mutex<MockInner>>,
    pub base_url: String,
}

impl MockWorker {
    pub async fn spawn(statuses: Vec<StatusReply>, report_body: &str) -> Self {
        let inner = Arc::new(Mutex::new(MockInner {
            scan_status: 202,
            statuses: statuses.into(),
            report_status: 200,
            report_body: report_body.to_string(),
            submissions: Vec::new(),
            status_calls: 0,
            report_calls: 0,
        }));

        let app = Router::new()
            .route("/scan", post(scan))
            .route("/status", get(status))
            .route("/report", get(report))
            .with_state(inner.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            inner,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn set_scan_status(&self, code: u16) {
        self.inner.lock().unwrap().scan_status = code;
    }

    pub fn set_report_status(&self, code: u16) {
        self.inner.lock().unwrap().report_status = code;
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.inner.lock().unwrap().status_calls
    }

    pub fn report_calls(&self) -> usize {
        self.inner.lock().unwrap().report_calls
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            base_url: self.base_url.clone(),
            poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_secs(2),
        }
    }

    pub fn config(&self) -> Config {
        Config {
            remote: self.remote_config(),
            controller: ControllerConfig {
                job_timeout: Some(Duration::from_secs(10)),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

type Shared = Arc<Mutex<MockInner>>;

async fn scan(State(s): State<Shared>, Json(body): Json<Value>) -> impl IntoResponse {
    let mut s = s.lock().unwrap();
    s.submissions.push(body);
    let code = StatusCode::from_u16(s.scan_status).unwrap();
    (code, Json(json!({ "status": "started" })))
}

async fn status(State(s): State<Shared>) -> axum::response::Response {
    let mut s = s.lock().unwrap();
    s.status_calls += 1;
    match s.statuses.pop_front().unwrap_or_else(|| finished(0)) {
        StatusReply::Code(c) => (StatusCode::from_u16(c).unwrap(), "unavailable").into_response(),
        StatusReply::Body(v) => Json(v).into_response(),
    }
}

async fn report(State(s): State<Shared>) -> impl IntoResponse {
    let mut s = s.lock().unwrap();
    s.report_calls += 1;
    (
        StatusCode::from_u16(s.report_status).unwrap(),
        s.report_body.clone(),
    )
}

/// Everything received on `rx` so far.
pub fn collect(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}
