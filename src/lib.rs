//! Library crate for scanctl: runs port-scan jobs on an external worker and
//! turns their output into summaries and reports.
pub mod artifacts;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod ports;
pub mod report;
pub mod request;
pub mod server;
pub mod transport;
pub mod types;
