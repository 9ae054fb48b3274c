//! Error taxonomy shared by the request boundary, the transports and the controller.

use std::time::Duration;
use thiserror::Error;

/// Rejected user input. Raised at the boundary; a job is never started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no target given: set exactly one of address, CIDR or range")]
    MissingTarget,

    #[error("conflicting targets: set exactly one of address, CIDR or range (got {0})")]
    ConflictingTargets(String),

    #[error("invalid target {input:?}: {reason}")]
    InvalidTarget { input: String, reason: String },

    #[error("port specification must not be empty")]
    MissingPorts,

    #[error("invalid port specification: {0}")]
    InvalidPorts(String),
}

/// Failure talking to a worker through a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Worker unreachable, binary missing or submission rejected.
    #[error("failed to start job: {0}")]
    Start(String),

    /// A single status read failed. The job itself keeps going.
    #[error("status check failed: {0}")]
    TransientStatus(String),

    /// Final output could not be retrieved.
    #[error("failed to fetch job output: {0}")]
    Fetch(String),

    /// The job outlived its configured time limit.
    #[error("job exceeded its time limit of {0:?}")]
    Timeout(Duration),

    /// The handle was used out of order: polled after cancel, fetched twice,
    /// fetched before success, or handed to the wrong transport.
    #[error("invalid use of job handle {job}: {reason}")]
    InvalidHandle { job: String, reason: &'static str },
}

/// Worker output was present but could not be understood.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed report JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("report is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("host {ip} lists port {port} more than once")]
    DuplicatePort { ip: String, port: u16 },

    #[error("host {ip} lists invalid port 0")]
    InvalidPort { ip: String },
}

/// Misuse of a controller instance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("controller already used; create a new one for another scan")]
    AlreadyStarted,
}
