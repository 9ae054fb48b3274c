//! Decoding of raw worker output (result file contents or HTTP bodies).
//!
//! Field names are matched case-insensitively, and `_`/`-` separators are
//! ignored, so `IP`, `ip`, `startedAt` and `started_at` are all understood.
//! Unknown fields are ignored and `null` values count as missing.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::types::{HostReport, RemoteStatus, ScanResult};

/// Decode a report payload into a [`ScanResult`].
///
/// Empty or whitespace-only input (and a bare JSON `null`) is an empty
/// result, not an error. Anything else that is not an array of host reports
/// is a [`DecodeError`].
pub fn decode(raw: &[u8]) -> Result<ScanResult, DecodeError> {
    let text = std::str::from_utf8(raw)?;
    let text = text.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Ok(ScanResult::default());
    }

    let value: Value = serde_json::from_str(text)?;
    if value.is_null() {
        return Ok(ScanResult::default());
    }
    let hosts: Vec<HostReport> = serde_json::from_value(normalize_keys(value))?;
    for host in &hosts {
        check_ports(host)?;
    }
    Ok(ScanResult::new(hosts))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StatusBody {
    running: bool,
    startedat: String,
    doneat: String,
    lasterror: String,
    hosts: u64,
}

/// Decode the body of a remote `GET /status` response.
pub fn decode_status(raw: &[u8]) -> Result<RemoteStatus, DecodeError> {
    let text = std::str::from_utf8(raw)?;
    let value: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))?;
    let body: StatusBody = serde_json::from_value(normalize_keys(value))?;
    Ok(RemoteStatus {
        running: body.running,
        started_at: body.startedat,
        done_at: body.doneat,
        last_error: body.lasterror,
        hosts: body.hosts,
    })
}

fn check_ports(host: &HostReport) -> Result<(), DecodeError> {
    let mut seen = HashSet::new();
    for p in &host.ports {
        if p.port == 0 {
            return Err(DecodeError::InvalidPort {
                ip: host.ip.clone(),
            });
        }
        if !seen.insert(p.port) {
            return Err(DecodeError::DuplicatePort {
                ip: host.ip.clone(),
                port: p.port,
            });
        }
    }
    Ok(())
}

fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (fold_key(&k), normalize_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
