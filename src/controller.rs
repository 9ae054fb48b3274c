//! Scan job controller: drives one job through a [`Transport`] in the
//! background and publishes its state.
//!
//! ```text
//! Idle -> Starting -> Running -> { Completed | Failed | TimedOut }
//!            \-> Failed (start rejected)
//! ```
//!
//! State only moves forward and terminal states are final. A new scan needs a
//! new controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::decode;
use crate::error::{ControllerError, TransportError};
use crate::request::ScanRequest;
use crate::transport::{JobHandle, Transport};
use crate::types::{JobStatus, RemoteStatus, ScanResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Starting,
    Running {
        job: Uuid,
        status: JobStatus,
        polls: u64,
    },
    Completed {
        result: Arc<ScanResult>,
    },
    Failed {
        reason: String,
    },
    /// The job may still be alive on the worker side.
    TimedOut {
        reason: String,
    },
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerState::Completed { .. }
                | ControllerState::Failed { .. }
                | ControllerState::TimedOut { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Starting => "starting",
            ControllerState::Running { .. } => "running",
            ControllerState::Completed { .. } => "completed",
            ControllerState::Failed { .. } => "failed",
            ControllerState::TimedOut { .. } => "timed_out",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ControllerState::Failed { reason } | ControllerState::TimedOut { reason } => {
                Some(reason)
            }
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&Arc<ScanResult>> {
        match self {
            ControllerState::Completed { result } => Some(result),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ControllerState::Idle => 0,
            ControllerState::Starting => 1,
            ControllerState::Running { .. } => 2,
            _ => 3,
        }
    }
}

/// Notifications published while a job runs.
#[derive(Debug, Clone)]
pub enum JobEvent {
    StateChanged(ControllerState),
    /// A line the local worker wrote to stdout or stderr.
    WorkerOutput { stream: &'static str, line: String },
    /// Latest `/status` body from a remote worker.
    RemoteProgress(RemoteStatus),
    /// One status check failed; polling continues.
    TransientError(String),
    /// Output was present but unparseable. Followed by a `Failed` state.
    DecodeFailed(String),
    Notice(String),
}

/// Owns exactly one job from start to a terminal state.
///
/// Cloning shares the same job; concurrent scans need separate controllers.
#[derive(Clone)]
pub struct ScanJobController {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ControllerConfig,
    state: watch::Sender<ControllerState>,
    events: broadcast::Sender<JobEvent>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl std::fmt::Debug for ScanJobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanJobController")
            .field("transport", &self.inner.transport.name())
            .field("state", &self.state().label())
            .finish()
    }
}

impl ScanJobController {
    pub fn new(transport: Arc<dyn Transport>, config: ControllerConfig) -> Self {
        let (state, _) = watch::channel(ControllerState::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                events,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Latest observed state. Never waits.
    pub fn state(&self) -> ControllerState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Begin the job and return immediately; supervision runs on a spawned
    /// task. Must be called from within a Tokio runtime.
    pub fn start(&self, request: ScanRequest) -> Result<(), ControllerError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ControllerError::AlreadyStarted);
        }
        if !self.inner.advance(ControllerState::Starting) {
            return Err(ControllerError::AlreadyStarted);
        }
        info!(
            transport = self.inner.transport.name(),
            target = %request.target(),
            ports = request.ports(),
            "starting scan job"
        );
        tokio::spawn(run(self.inner.clone(), request));
        Ok(())
    }

    /// Best-effort stop. A live job ends in `TimedOut`; a terminal one is
    /// left untouched.
    pub fn cancel(&self) {
        if !self.inner.started.swap(true, Ordering::AcqRel) {
            self.inner.advance(ControllerState::TimedOut {
                reason: "cancelled before start".to_string(),
            });
        }
        self.inner.cancel.cancel();
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait(&self) -> ControllerState {
        let mut rx = self.inner.state.subscribe();
        let reached = rx
            .wait_for(ControllerState::is_terminal)
            .await
            .map(|s| (*s).clone());
        match reached {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }
}

impl Inner {
    /// Apply a transition if it moves forward. Returns whether it was applied.
    fn advance(&self, next: ControllerState) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|current| {
            if current.is_terminal() || next.rank() < current.rank() {
                return false;
            }
            if *current == next {
                return false;
            }
            *current = next.clone();
            applied = true;
            true
        });
        if applied {
            match &next {
                ControllerState::Running { status, polls, .. } => {
                    debug!(?status, polls, "job status")
                }
                ControllerState::Failed { reason } => warn!(%reason, "job failed"),
                ControllerState::TimedOut { reason } => warn!(%reason, "job timed out"),
                other => info!(state = other.label(), "job state changed"),
            }
            let _ = self.events.send(JobEvent::StateChanged(next));
        }
        applied
    }

    fn fail(&self, reason: impl Into<String>) {
        self.advance(ControllerState::Failed {
            reason: reason.into(),
        });
    }

    fn time_out(&self, reason: String) {
        self.advance(ControllerState::TimedOut { reason });
    }

    /// Resolves when the caller cancels or the job deadline passes.
    async fn interrupted(&self, deadline: Option<Instant>) -> String {
        let limit = self.config.job_timeout.unwrap_or_default();
        tokio::select! {
            _ = self.cancel.cancelled() => "cancelled by caller".to_string(),
            _ = until(deadline) => TransportError::Timeout(limit).to_string(),
        }
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run(inner: Arc<Inner>, request: ScanRequest) {
    let transport = inner.transport.clone();
    let deadline = inner.config.job_timeout.map(|t| Instant::now() + t);

    let started = tokio::select! {
        biased;
        reason = inner.interrupted(deadline) => Err(reason),
        res = transport.start(&request, inner.events.clone()) => Ok(res),
    };
    let handle = match started {
        Err(reason) => {
            inner.time_out(reason);
            return;
        }
        Ok(Err(e)) => {
            inner.fail(e.to_string());
            return;
        }
        Ok(Ok(handle)) => handle,
    };

    inner.advance(ControllerState::Running {
        job: handle.id(),
        status: JobStatus::Pending,
        polls: 0,
    });

    if let Err(reason) = supervise(&inner, &handle, deadline).await {
        transport.cancel(&handle).await;
        inner.time_out(reason);
        return;
    }
    if inner.state.borrow().is_terminal() {
        return;
    }

    let fetched = tokio::select! {
        biased;
        reason = inner.interrupted(deadline) => Err(reason),
        res = transport.fetch_output(&handle) => Ok(res),
    };
    let raw = match fetched {
        Err(reason) => {
            transport.cancel(&handle).await;
            inner.time_out(reason);
            return;
        }
        Ok(Err(e)) => {
            inner.fail(e.to_string());
            return;
        }
        Ok(Ok(raw)) => raw,
    };

    match decode::decode(&raw) {
        Ok(result) => {
            info!(job = %handle.id(), hosts = result.len(), "scan job completed");
            inner.advance(ControllerState::Completed {
                result: Arc::new(result),
            });
        }
        Err(e) => {
            let _ = inner.events.send(JobEvent::DecodeFailed(e.to_string()));
            inner.fail(format!("worker output could not be decoded: {e}"));
        }
    }
}

/// Poll until the job succeeds. Terminal failures are applied here; an
/// `Err` carries the reason for an interruption (cancel or deadline).
async fn supervise(
    inner: &Inner,
    handle: &JobHandle,
    deadline: Option<Instant>,
) -> Result<(), String> {
    let transport = &inner.transport;
    let mut ticker = time::interval(transport.poll_interval().max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls = 0u64;

    loop {
        tokio::select! {
            biased;
            reason = inner.interrupted(deadline) => return Err(reason),
            _ = ticker.tick() => {}
        }
        polls += 1;

        let polled = tokio::select! {
            biased;
            reason = inner.interrupted(deadline) => return Err(reason),
            res = transport.poll(handle) => res,
        };
        match polled {
            Ok(JobStatus::Succeeded) => return Ok(()),
            Ok(JobStatus::Failed(reason)) => {
                inner.fail(reason);
                return Ok(());
            }
            Ok(JobStatus::TimedOut) => {
                inner.time_out("worker reported a timeout".to_string());
                return Ok(());
            }
            Ok(status) => {
                inner.advance(ControllerState::Running {
                    job: handle.id(),
                    status,
                    polls,
                });
            }
            Err(TransportError::TransientStatus(msg)) => {
                warn!(job = %handle.id(), "{msg}; will retry");
                let _ = inner.events.send(JobEvent::TransientError(msg));
            }
            Err(e) => {
                inner.fail(e.to_string());
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ScanForm;
    use crate::transport::{EventSink, JobContext};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct FakeTransport {
        start_error: Option<String>,
        statuses: Mutex<VecDeque<Result<JobStatus, TransportError>>>,
        output: Vec<u8>,
        fetches: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl FakeTransport {
        fn new(statuses: Vec<Result<JobStatus, TransportError>>, output: &[u8]) -> Self {
            Self {
                start_error: None,
                statuses: Mutex::new(statuses.into()),
                output: output.to_vec(),
                fetches: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn start(
            &self,
            _request: &ScanRequest,
            _events: EventSink,
        ) -> Result<JobHandle, TransportError> {
            match &self.start_error {
                Some(e) => Err(TransportError::Start(e.clone())),
                None => Ok(JobHandle::new(
                    Uuid::new_v4(),
                    JobContext::Remote(Default::default()),
                )),
            }
        }

        async fn poll(&self, job: &JobHandle) -> Result<JobStatus, TransportError> {
            job.ensure_pollable()?;
            let next = self.statuses.lock().unwrap().pop_front();
            let status = next.unwrap_or(Ok(JobStatus::Running))?;
            job.observe(&status);
            Ok(status)
        }

        async fn fetch_output(&self, job: &JobHandle) -> Result<Vec<u8>, TransportError> {
            job.begin_fetch()?;
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }

        async fn cancel(&self, job: &JobHandle) {
            job.mark_cancelled();
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    const ONE_HOST: &[u8] =
        br#"[{"ip":"10.0.0.1","ports":[{"port":22,"open":true,"banner":"SSH-2.0"}]}]"#;

    fn request() -> ScanRequest {
        ScanForm {
            range: Some("10.0.0.1-10.0.0.2".into()),
            ports: "22-23".into(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn controller(fake: Arc<FakeTransport>) -> ScanJobController {
        ScanJobController::new(fake, ControllerConfig::default())
    }

    fn drain_states(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn completes_and_fetches_once() {
        let fake = Arc::new(FakeTransport::new(
            vec![Ok(JobStatus::Running), Ok(JobStatus::Succeeded)],
            ONE_HOST,
        ));
        let ctl = controller(fake.clone());
        assert_eq!(ctl.state(), ControllerState::Idle);
        ctl.start(request()).unwrap();

        let end = ctl.wait().await;
        let result = end.result().expect("completed");
        assert_eq!(result.len(), 1);
        assert_eq!(result.hosts()[0].open_count(), 1);
        assert_eq!(fake.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_error_fails_without_running() {
        let mut fake = FakeTransport::new(vec![], b"");
        fake.start_error = Some("500 Internal Server Error".into());
        let ctl = controller(Arc::new(fake));
        let mut events = ctl.subscribe();
        ctl.start(request()).unwrap();

        let end = ctl.wait().await;
        assert_eq!(end.label(), "failed");
        assert!(end.reason().unwrap().contains("500"));
        let seen = drain_states(&mut events);
        assert!(!seen.iter().any(|e| matches!(
            e,
            JobEvent::StateChanged(ControllerState::Running { .. })
        )));
    }

    #[tokio::test]
    async fn transient_status_error_keeps_polling() {
        let fake = Arc::new(FakeTransport::new(
            vec![
                Err(TransportError::TransientStatus("status endpoint answered 503".into())),
                Ok(JobStatus::Running),
                Ok(JobStatus::Succeeded),
            ],
            b"[]",
        ));
        let ctl = controller(fake);
        let mut events = ctl.subscribe();
        ctl.start(request()).unwrap();

        let end = ctl.wait().await;
        assert_eq!(end.label(), "completed");
        let seen = drain_states(&mut events);
        assert!(seen
            .iter()
            .any(|e| matches!(e, JobEvent::TransientError(m) if m.contains("503"))));
        assert!(!seen.iter().any(|e| matches!(
            e,
            JobEvent::StateChanged(ControllerState::Failed { .. })
        )));
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let fake = Arc::new(FakeTransport::new(
            vec![Ok(JobStatus::Failed("worker exited with code 2".into()))],
            b"",
        ));
        let ctl = controller(fake.clone());
        ctl.start(request()).unwrap();
        let end = ctl.wait().await;
        assert_eq!(end.reason(), Some("worker exited with code 2"));
        assert_eq!(fake.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_output_is_reported_distinctly() {
        let fake = Arc::new(FakeTransport::new(vec![Ok(JobStatus::Succeeded)], b"[{oops"));
        let ctl = controller(fake);
        let mut events = ctl.subscribe();
        ctl.start(request()).unwrap();
        let end = ctl.wait().await;
        assert_eq!(end.label(), "failed");
        assert!(drain_states(&mut events)
            .iter()
            .any(|e| matches!(e, JobEvent::DecodeFailed(_))));
    }

    #[tokio::test]
    async fn empty_output_completes_with_empty_result() {
        let fake = Arc::new(FakeTransport::new(vec![Ok(JobStatus::Succeeded)], b""));
        let ctl = controller(fake);
        ctl.start(request()).unwrap();
        let end = ctl.wait().await;
        assert!(end.result().expect("completed").is_empty());
    }

    #[tokio::test]
    async fn terminal_state_is_final() {
        let fake = Arc::new(FakeTransport::new(vec![Ok(JobStatus::Succeeded)], b"[]"));
        let ctl = controller(fake.clone());
        ctl.start(request()).unwrap();
        let end = ctl.wait().await;

        ctl.cancel();
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctl.state(), end);
        assert_eq!(ctl.state(), end);
        assert_eq!(ctl.start(request()), Err(ControllerError::AlreadyStarted));
    }

    #[tokio::test]
    async fn cancel_while_running_times_out() {
        let fake = Arc::new(FakeTransport::new(vec![], b""));
        let ctl = controller(fake.clone());
        ctl.start(request()).unwrap();

        let mut rx = ctl.watch();
        rx.wait_for(|s| matches!(s, ControllerState::Running { polls, .. } if *polls >= 1))
            .await
            .unwrap();
        ctl.cancel();

        let end = ctl.wait().await;
        assert_eq!(end.label(), "timed_out");
        assert_eq!(fake.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn job_deadline_times_out() {
        let fake = Arc::new(FakeTransport::new(vec![], b""));
        let ctl = ScanJobController::new(
            fake.clone(),
            ControllerConfig {
                job_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );
        ctl.start(request()).unwrap();
        let end = ctl.wait().await;
        assert_eq!(end.label(), "timed_out");
        assert_eq!(
            end.reason(),
            Some(TransportError::Timeout(Duration::from_millis(50)).to_string().as_str())
        );
        assert!(end.reason().unwrap().contains("time limit"));
        assert_eq!(fake.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_before_start_is_terminal() {
        let ctl = controller(Arc::new(FakeTransport::new(vec![], b"")));
        ctl.cancel();
        assert_eq!(ctl.state().label(), "timed_out");
        assert_eq!(ctl.start(request()), Err(ControllerError::AlreadyStarted));
    }
}
