//! Runtime configuration. Every value has a default; the CLI overrides them.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Settings for [`crate::transport::LocalProcessTransport`].
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Worker executable. Its parent directory becomes the working directory.
    pub worker_path: PathBuf,
    /// Fixed result file. When unset each job writes to its own file in the
    /// temp directory so concurrent jobs never collide.
    pub output_path: Option<PathBuf>,
    pub poll_interval: Duration,
    /// How often to look for the result file after the worker exits.
    pub file_wait_interval: Duration,
    /// How long to wait for the result file before treating the job as
    /// having produced no output.
    pub file_wait_timeout: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            worker_path: PathBuf::from("scanner"),
            output_path: None,
            poll_interval: Duration::from_millis(200),
            file_wait_interval: Duration::from_millis(100),
            file_wait_timeout: Duration::from_millis(5000),
        }
    }
}

/// Settings for [`crate::transport::RemoteServiceTransport`].
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub poll_interval: Duration,
    /// Per-request timeout for every HTTP call.
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Settings for [`crate::controller::ScanJobController`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Upper bound on a job's run time. Exceeding it ends in `TimedOut`.
    pub job_timeout: Option<Duration>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Some(Duration::from_secs(30 * 60)),
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub controller: ControllerConfig,
    /// Where the last report's JSON and HTML copies are written.
    pub artifact_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            controller: ControllerConfig::default(),
            artifact_dir: std::env::temp_dir(),
        }
    }
}
