use serde::{Deserialize, Serialize};

/// Outcome of probing one port on one host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub banner: String,
}

/// Every probed port of a single host, in the order the worker scanned them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub ip: String,
    #[serde(default)]
    pub ports: Vec<PortResult>,
}

impl HostReport {
    /// Number of ports reported open. Always derived from `ports`.
    pub fn open_count(&self) -> usize {
        self.ports.iter().filter(|p| p.open).count()
    }
}

/// Decoded output of one finished job. An empty result is valid and means
/// no host answered or the worker wrote nothing.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ScanResult {
    hosts: Vec<HostReport>,
}

impl ScanResult {
    pub fn new(hosts: Vec<HostReport>) -> Self {
        Self { hosts }
    }

    pub fn hosts(&self) -> &[HostReport] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// One row of a [`ReportSummary`].
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HostSummary {
    pub ip: String,
    pub open_count: usize,
}

/// Per-host open-port counts, in the host order of the result it came from.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ReportSummary {
    pub hosts: Vec<HostSummary>,
}

impl ReportSummary {
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Open-port count of the first row for `ip`.
    pub fn open_count_of(&self, ip: &str) -> Option<usize> {
        self.hosts
            .iter()
            .find(|h| h.ip == ip)
            .map(|h| h.open_count)
    }

    pub fn total_open(&self) -> usize {
        self.hosts.iter().map(|h| h.open_count).sum()
    }
}

/// Status of a job as observed through a transport.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed(_) | JobStatus::TimedOut
        )
    }
}

/// Body of the remote worker's `GET /status`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteStatus {
    pub running: bool,
    pub started_at: String,
    pub done_at: String,
    pub last_error: String,
    pub hosts: u64,
}
