use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EventSink, JobContext, JobHandle, Transport};
use crate::config::RemoteConfig;
use crate::controller::JobEvent;
use crate::decode;
use crate::error::TransportError;
use crate::ports;
use crate::request::{ScanRequest, Target};
use crate::types::JobStatus;

/// Drives a scan service over HTTP: `POST /scan`, `GET /status`, `GET /report`.
#[derive(Debug, Clone)]
pub struct RemoteServiceTransport {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Default)]
pub(crate) struct RemoteJob {
    events: Option<EventSink>,
}

/// JSON body of `POST /scan`. At most one of `cidr` and `range` is set.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanSubmission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    pub ports: String,
    pub concurrency: u32,
    pub timeout_ms: u64,
}

impl From<&ScanRequest> for ScanSubmission {
    fn from(request: &ScanRequest) -> Self {
        // The service only knows CIDRs and ranges; a single address is a one-host range.
        let (cidr, range) = match request.target() {
            Target::Cidr(net) => (Some(net.to_string()), None),
            Target::Range { start, end } => (None, Some(format!("{start}-{end}"))),
            Target::Address(ip) => (None, Some(format!("{ip}-{ip}"))),
        };
        Self {
            cidr,
            range,
            ports: ports::worker_port_arg(request.port_list()),
            concurrency: request.concurrency(),
            timeout_ms: request.timeout_ms(),
        }
    }
}

impl RemoteServiceTransport {
    pub fn new(config: &RemoteConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Start(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn job<'a>(&self, job: &'a JobHandle) -> Result<&'a RemoteJob, TransportError> {
        match job.context() {
            JobContext::Remote(remote) => Ok(remote),
            JobContext::Local(_) => Err(job.wrong_transport()),
        }
    }

    /// `GET /report` without a job handle, for fetching whatever the service
    /// last produced.
    pub async fn fetch_report(&self) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .client
            .get(self.url("/report"))
            .send()
            .await
            .map_err(|e| TransportError::Fetch(format!("report request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::Fetch(format!(
                "report endpoint answered {status}: {}",
                text.trim()
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Fetch(format!("report body unreadable: {e}")))?;
        debug!(bytes = body.len(), "fetched report");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Transport for RemoteServiceTransport {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn start(
        &self,
        request: &ScanRequest,
        events: EventSink,
    ) -> Result<JobHandle, TransportError> {
        let body = ScanSubmission::from(request);
        let resp = self
            .client
            .post(self.url("/scan"))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Start(format!("scan service unreachable: {e}")))?;

        let status = resp.status();
        if !(status.is_success() || status == StatusCode::ACCEPTED) {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::Start(format!(
                "scan rejected with {status}: {}",
                text.trim()
            )));
        }

        let id = Uuid::new_v4();
        info!(job = %id, url = %self.base_url, "remote scan accepted");
        Ok(JobHandle::new(
            id,
            JobContext::Remote(RemoteJob {
                events: Some(events),
            }),
        ))
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, TransportError> {
        let remote = self.job(job)?;
        job.ensure_pollable()?;

        let resp = self
            .client
            .get(self.url("/status"))
            .send()
            .await
            .map_err(|e| TransportError::TransientStatus(format!("status request failed: {e}")))?;
        let code = resp.status();
        if !code.is_success() {
            return Err(TransportError::TransientStatus(format!(
                "status endpoint answered {code}"
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::TransientStatus(format!("status body unreadable: {e}")))?;
        let remote_status = decode::decode_status(&body)
            .map_err(|e| TransportError::TransientStatus(format!("status body invalid: {e}")))?;

        if let Some(events) = &remote.events {
            let _ = events.send(JobEvent::RemoteProgress(remote_status.clone()));
        }

        let status = if remote_status.running {
            JobStatus::Running
        } else if !remote_status.last_error.trim().is_empty() {
            JobStatus::Failed(remote_status.last_error.trim().to_string())
        } else {
            JobStatus::Succeeded
        };
        if status.is_terminal() {
            info!(job = %job.id(), ?status, hosts = remote_status.hosts, "remote job finished");
        }
        job.observe(&status);
        Ok(status)
    }

    async fn fetch_output(&self, job: &JobHandle) -> Result<Vec<u8>, TransportError> {
        self.job(job)?;
        job.begin_fetch()?;
        self.fetch_report().await
    }

    async fn cancel(&self, job: &JobHandle) {
        if self.job(job).is_err() {
            warn!(job = %job.id(), "cancel ignored: handle belongs to another transport");
            return;
        }
        if job.mark_cancelled() {
            info!(job = %job.id(), "stopped polling remote job; the service may keep running");
        }
    }
}
