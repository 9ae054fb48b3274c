use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EventSink, JobContext, JobHandle, Transport};
use crate::config::LocalConfig;
use crate::controller::JobEvent;
use crate::error::TransportError;
use crate::ports;
use crate::request::ScanRequest;
use crate::types::JobStatus;

/// Runs the worker as a child process and reads its result file.
#[derive(Debug, Clone)]
pub struct LocalProcessTransport {
    config: LocalConfig,
}

pub(crate) struct LocalJob {
    child: Mutex<Child>,
    output_path: PathBuf,
    /// Per-job temp file, removed once read.
    owns_output: bool,
    drains: Mutex<Vec<JoinHandle<()>>>,
    events: EventSink,
}

impl LocalProcessTransport {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    /// Absolute result path for job `id`. The worker runs in its own
    /// directory, so a relative path would name a different file for it.
    fn output_path_for(&self, id: Uuid) -> Result<PathBuf, TransportError> {
        let path = match &self.config.output_path {
            Some(fixed) => fixed.clone(),
            None => std::env::temp_dir().join(format!("scanctl-{id}.json")),
        };
        std::path::absolute(&path).map_err(|e| {
            TransportError::Start(format!("cannot resolve result file {}: {e}", path.display()))
        })
    }

    fn job<'a>(&self, job: &'a JobHandle) -> Result<&'a LocalJob, TransportError> {
        match job.context() {
            JobContext::Local(local) => Ok(local),
            JobContext::Remote(_) => Err(job.wrong_transport()),
        }
    }
}

/// Worker arguments for a request writing its result to `out`.
pub fn worker_args(request: &ScanRequest, out: &Path) -> Vec<String> {
    vec![
        "-range".into(),
        request.target().to_string(),
        "-ports".into(),
        ports::worker_port_arg(request.port_list()),
        "-out".into(),
        out.display().to_string(),
        "-workers".into(),
        request.concurrency().to_string(),
        "-timeout".into(),
        request.timeout_ms().to_string(),
    ]
}

#[async_trait]
impl Transport for LocalProcessTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn start(
        &self,
        request: &ScanRequest,
        events: EventSink,
    ) -> Result<JobHandle, TransportError> {
        let id = Uuid::new_v4();
        let output_path = self.output_path_for(id)?;

        // A leftover file from an earlier run must not be mistaken for this job's output.
        match tokio::fs::remove_file(&output_path).await {
            Ok(()) => debug!(path = %output_path.display(), "removed stale result file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TransportError::Start(format!(
                    "cannot clear result file {}: {e}",
                    output_path.display()
                )))
            }
        }

        let worker = resolve_worker(&self.config.worker_path)?;
        let worker = worker.as_path();
        let mut cmd = Command::new(worker);
        cmd.args(worker_args(request, &output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = worker.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Start(format!("cannot launch worker {}: {e}", worker.display()))
        })?;
        info!(job = %id, worker = %worker.display(), pid = ?child.id(), "worker process started");

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain(stdout, "stdout", events.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain(stderr, "stderr", events.clone())));
        }

        Ok(JobHandle::new(
            id,
            JobContext::Local(LocalJob {
                child: Mutex::new(child),
                output_path,
                owns_output: self.config.output_path.is_none(),
                drains: Mutex::new(drains),
                events,
            }),
        ))
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, TransportError> {
        let local = self.job(job)?;
        job.ensure_pollable()?;
        let status = match local.child.lock().await.try_wait() {
            Ok(None) => JobStatus::Running,
            Ok(Some(exit)) if exit.success() => JobStatus::Succeeded,
            Ok(Some(exit)) => match exit.code() {
                Some(code) => JobStatus::Failed(format!("worker exited with code {code}")),
                None => JobStatus::Failed("worker terminated by signal".to_string()),
            },
            Err(e) => {
                return Err(TransportError::TransientStatus(format!(
                    "cannot query worker process: {e}"
                )))
            }
        };
        if status.is_terminal() {
            info!(job = %job.id(), ?status, "worker process exited");
        }
        job.observe(&status);
        Ok(status)
    }

    async fn fetch_output(&self, job: &JobHandle) -> Result<Vec<u8>, TransportError> {
        let local = self.job(job)?;
        job.begin_fetch()?;

        // Output streams hit EOF once the worker is gone; let the drains finish.
        let drains = std::mem::take(&mut *local.drains.lock().await);
        for handle in drains {
            if time::timeout(self.config.file_wait_timeout, handle).await.is_err() {
                warn!(job = %job.id(), "worker output still open after exit; continuing");
            }
        }

        let path = &local.output_path;
        if !wait_for_file(
            path,
            self.config.file_wait_interval,
            self.config.file_wait_timeout,
        )
        .await
        {
            warn!(
                job = %job.id(),
                path = %path.display(),
                waited = ?self.config.file_wait_timeout,
                "result file did not appear; treating job as having no output"
            );
            let _ = local.events.send(JobEvent::Notice(format!(
                "result file {} did not appear within {:?}",
                path.display(),
                self.config.file_wait_timeout
            )));
            return Ok(Vec::new());
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Fetch(format!("cannot read {}: {e}", path.display())))?;
        debug!(job = %job.id(), bytes = bytes.len(), "read result file");
        if local.owns_output {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(job = %job.id(), path = %path.display(), "cannot remove result file: {e}");
            }
        }
        Ok(bytes)
    }

    async fn cancel(&self, job: &JobHandle) {
        let Ok(local) = self.job(job) else {
            warn!(job = %job.id(), "cancel ignored: handle belongs to another transport");
            return;
        };
        if !job.mark_cancelled() {
            return;
        }
        match local.child.lock().await.start_kill() {
            Ok(()) => info!(job = %job.id(), "termination requested for worker process"),
            Err(e) => debug!(job = %job.id(), "worker already gone: {e}"),
        }
    }
}

/// A worker path with a directory part is made absolute, since the child's
/// working directory is changed before the program is looked up. A bare name
/// is left for `PATH` lookup.
fn resolve_worker(worker: &Path) -> Result<PathBuf, TransportError> {
    let has_dir = worker.parent().is_some_and(|d| !d.as_os_str().is_empty());
    if !has_dir {
        return Ok(worker.to_path_buf());
    }
    std::path::absolute(worker).map_err(|e| {
        TransportError::Start(format!("cannot resolve worker path {}: {e}", worker.display()))
    })
}

/// Read a child stream to EOF, forwarding each line. Never stops early, so
/// the child cannot block on a full pipe.
async fn drain<R>(stream: R, label: &'static str, events: EventSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                debug!(stream = label, "{line}");
                let _ = events.send(JobEvent::WorkerOutput {
                    stream: label,
                    line,
                });
            }
            Err(e) => {
                warn!(stream = label, "worker output read failed: {e}");
                break;
            }
        }
    }
}

/// Poll for `path` every `interval` until it exists or `bound` elapses.
async fn wait_for_file(path: &Path, interval: Duration, bound: Duration) -> bool {
    let deadline = Instant::now() + bound;
    loop {
        if matches!(tokio::fs::metadata(path).await, Ok(m) if m.is_file()) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        time::sleep(interval.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}
