//! How a job is started, observed and collected.
//!
//! A [`Transport`] hands out a [`JobHandle`] from [`Transport::start`]; every
//! later call takes that handle. Handles are only obtainable from `start`, so
//! polling a job that was never started cannot be expressed. Out-of-order use
//! of a live handle (poll after cancel, fetch before success, fetch twice) is
//! reported as [`TransportError::InvalidHandle`].

pub mod local;
pub mod remote;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Config;
use crate::controller::JobEvent;
use crate::error::TransportError;
use crate::request::ScanRequest;
use crate::types::JobStatus;

pub use local::LocalProcessTransport;
pub use remote::RemoteServiceTransport;

/// Sink for progress notifications produced while a job runs.
pub type EventSink = broadcast::Sender<JobEvent>;

/// Which worker backend a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Spawn the worker executable on this machine.
    Local,
    /// Submit to a scan service over HTTP.
    Remote,
}

/// Build the transport for `kind` from the shared configuration.
pub fn build(kind: TransportKind, config: &Config) -> Result<Arc<dyn Transport>, TransportError> {
    Ok(match kind {
        TransportKind::Local => Arc::new(LocalProcessTransport::new(config.local.clone())),
        TransportKind::Remote => Arc::new(RemoteServiceTransport::new(&config.remote)?),
    })
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Cadence at which the controller should call [`Transport::poll`].
    fn poll_interval(&self) -> Duration;

    async fn start(
        &self,
        request: &ScanRequest,
        events: EventSink,
    ) -> Result<JobHandle, TransportError>;

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, TransportError>;

    /// Raw job output. Only valid once, after `poll` reported `Succeeded`.
    async fn fetch_output(&self, job: &JobHandle) -> Result<Vec<u8>, TransportError>;

    /// Best-effort stop. Further polls on the handle are rejected.
    async fn cancel(&self, job: &JobHandle);
}

pub(crate) enum JobContext {
    Local(local::LocalJob),
    Remote(remote::RemoteJob),
}

/// One started job: an identifier plus whatever the transport needs to
/// follow it.
pub struct JobHandle {
    id: Uuid,
    context: JobContext,
    cancelled: AtomicBool,
    succeeded: AtomicBool,
    fetched: AtomicBool,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.context {
            JobContext::Local(_) => "local",
            JobContext::Remote(_) => "remote",
        };
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

impl JobHandle {
    pub(crate) fn new(id: Uuid, context: JobContext) -> Self {
        Self {
            id,
            context,
            cancelled: AtomicBool::new(false),
            succeeded: AtomicBool::new(false),
            fetched: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn invalid(&self, reason: &'static str) -> TransportError {
        TransportError::InvalidHandle {
            job: self.id.to_string(),
            reason,
        }
    }

    pub(crate) fn wrong_transport(&self) -> TransportError {
        self.invalid("handle belongs to another transport")
    }

    pub(crate) fn ensure_pollable(&self) -> Result<(), TransportError> {
        if self.is_cancelled() {
            return Err(self.invalid("polled after cancel"));
        }
        Ok(())
    }

    /// Remember a status so `begin_fetch` can check ordering.
    pub(crate) fn observe(&self, status: &JobStatus) {
        if *status == JobStatus::Succeeded {
            self.succeeded.store(true, Ordering::Release);
        }
    }

    pub(crate) fn begin_fetch(&self) -> Result<(), TransportError> {
        if self.is_cancelled() {
            return Err(self.invalid("output fetched after cancel"));
        }
        if !self.succeeded.load(Ordering::Acquire) {
            return Err(self.invalid("output fetched before the job succeeded"));
        }
        if self.fetched.swap(true, Ordering::AcqRel) {
            return Err(self.invalid("output already fetched"));
        }
        Ok(())
    }

    /// Returns false when the handle was already cancelled.
    pub(crate) fn mark_cancelled(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }
}
