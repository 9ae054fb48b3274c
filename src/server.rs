//! Embedded HTTP front-end: start a scan, watch it, fetch its report.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    artifacts::{self, Artifacts},
    config::Config,
    controller::{ControllerState, ScanJobController},
    report,
    request::ScanForm,
    transport::{self, TransportKind},
    types::{JobStatus, ReportSummary},
};

pub const ABOUT: &str = concat!(
    "scanctl ",
    env!("CARGO_PKG_VERSION"),
    ": starts port scans on an external worker (local executable or HTTP service), ",
    "follows their progress and turns the worker's output into summaries and HTML reports. ",
    "The scanning itself is done by the worker."
);

#[derive(Clone)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // latest controller; replaced on each start
}

#[derive(Debug)]
struct ServerState {
    kind: TransportKind,
    config: Config,
    controller: Option<ScanJobController>,
}

impl AppState {
    pub fn new(kind: TransportKind, config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState {
                kind,
                config,
                controller: None,
            })),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct StatusView {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    pub polls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<usize>,
}

impl From<&ControllerState> for StatusView {
    fn from(state: &ControllerState) -> Self {
        let mut view = StatusView {
            state: state.label().to_string(),
            reason: state.reason().map(str::to_string),
            ..Default::default()
        };
        match state {
            ControllerState::Running { job, status, polls } => {
                view.job = Some(job.to_string());
                view.status = Some(status.clone());
                view.polls = *polls;
            }
            ControllerState::Completed { result } => {
                view.hosts = Some(result.len());
                view.open = Some(report::summarize(result).total_open());
            }
            _ => {}
        }
        view
    }
}

#[derive(Debug, Serialize)]
struct ReportView {
    summary: ReportSummary,
    json_path: String,
    html_path: String,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/cancel", post(post_cancel))
        .route("/report", get(get_report))
        .route("/about", get(get_about))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    Router::new()
        .nest("/api", api)
        .route("/report.html", get(get_report_html))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving front-end on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn current_state(app: &AppState) -> ControllerState {
    let s = app.inner.read().await;
    s.controller
        .as_ref()
        .map(ScanJobController::state)
        .unwrap_or(ControllerState::Idle)
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let state = current_state(&app).await;
    (StatusCode::OK, Json(StatusView::from(&state)))
}

async fn get_about() -> impl IntoResponse {
    Json(serde_json::json!({ "about": ABOUT }))
}

async fn post_scan(State(app): State<AppState>, Json(form): Json<ScanForm>) -> impl IntoResponse {
    let request = match form.validate() {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let mut s = app.inner.write().await;
    if let Some(c) = s.controller.as_ref() {
        if !c.state().is_terminal() {
            return (StatusCode::CONFLICT, "scan already running").into_response();
        }
    }

    let transport = match transport::build(s.kind, &s.config) {
        Ok(t) => t,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let controller = ScanJobController::new(transport, s.config.controller.clone());
    if let Err(e) = controller.start(request) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    let view = StatusView::from(&controller.state());
    s.controller = Some(controller);

    (StatusCode::ACCEPTED, Json(view)).into_response()
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    match s.controller.as_ref() {
        Some(c) => {
            c.cancel();
            StatusCode::ACCEPTED
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn get_report(State(app): State<AppState>) -> impl IntoResponse {
    let (state, dir) = {
        let s = app.inner.read().await;
        let state = s
            .controller
            .as_ref()
            .map(ScanJobController::state)
            .unwrap_or(ControllerState::Idle);
        (state, s.config.artifact_dir.clone())
    };
    let Some(result) = state.result().cloned() else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let summary = report::summarize(&result);
    let generated_at = report::generation_timestamp();
    let written =
        tokio::task::spawn_blocking(move || artifacts::persist(&dir, &result, &generated_at)).await;
    match written {
        Ok(Ok(Artifacts { json, html })) => (
            StatusCode::OK,
            Json(ReportView {
                summary,
                json_path: json.display().to_string(),
                html_path: html.display().to_string(),
            }),
        )
            .into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_report_html(State(app): State<AppState>) -> impl IntoResponse {
    let state = current_state(&app).await;
    match state.result() {
        Some(result) => Html(report::render_now(result)).into_response(),
        None => (StatusCode::NOT_FOUND, "no completed scan").into_response(),
    }
}
