//! Boundary validation: raw user input in, immutable [`ScanRequest`] out.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ValidationError;
use crate::ports;

pub const DEFAULT_CONCURRENCY: u32 = 200;
pub const DEFAULT_TIMEOUT_MS: u64 = 1500;

const IPV4_ONLY: &str = "only IPv4 targets are supported";

/// Which hosts a job scans. One variant per request, so "exactly one target
/// form" holds by construction. IPv4 only: workers expand targets into IPv4
/// host lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Address(Ipv4Addr),
    Cidr(Ipv4Net),
    Range { start: Ipv4Addr, end: Ipv4Addr },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Address(ip) => write!(f, "{ip}"),
            Target::Cidr(net) => write!(f, "{net}"),
            Target::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

impl Target {
    fn parse_cidr(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidTarget {
            input: input.to_string(),
            reason,
        };
        match input.parse::<IpNet>().map_err(|e| invalid(e.to_string()))? {
            IpNet::V4(net) => Ok(Target::Cidr(net)),
            IpNet::V6(_) => Err(invalid(IPV4_ONLY.to_string())),
        }
    }

    fn parse_address(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidTarget {
            input: input.to_string(),
            reason,
        };
        match input.parse::<IpAddr>().map_err(|e| invalid(e.to_string()))? {
            IpAddr::V4(ip) => Ok(Target::Address(ip)),
            IpAddr::V6(_) => Err(invalid(IPV4_ONLY.to_string())),
        }
    }

    fn parse_range(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidTarget {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let (a, b) = input
            .split_once('-')
            .ok_or_else(|| invalid("range must be start-end"))?;
        let start: Ipv4Addr = a
            .trim()
            .parse()
            .map_err(|_| invalid("range start is not an IPv4 address"))?;
        let end: Ipv4Addr = b
            .trim()
            .parse()
            .map_err(|_| invalid("range end is not an IPv4 address"))?;
        if u32::from(start) > u32::from(end) {
            return Err(invalid("range start is after range end"));
        }
        Ok(Target::Range { start, end })
    }
}

/// A validated scan request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    target: Target,
    ports: String,
    port_list: Vec<u16>,
    concurrency: u32,
    timeout_ms: u64,
}

impl ScanRequest {
    /// Build a request. Zero numeric hints fall back to the defaults.
    pub fn new(
        target: Target,
        ports: &str,
        concurrency: u32,
        timeout_ms: u64,
    ) -> Result<Self, ValidationError> {
        let ports = ports.trim();
        if ports.is_empty() {
            return Err(ValidationError::MissingPorts);
        }
        let port_list = ports::parse_port_expr(ports)
            .map_err(|e| ValidationError::InvalidPorts(format!("{e:#}")))?;
        Ok(Self {
            target,
            ports: ports.to_string(),
            port_list,
            concurrency: if concurrency == 0 {
                DEFAULT_CONCURRENCY
            } else {
                concurrency
            },
            timeout_ms: if timeout_ms == 0 {
                DEFAULT_TIMEOUT_MS
            } else {
                timeout_ms
            },
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Port expression as the user typed it (trimmed).
    pub fn ports(&self) -> &str {
        &self.ports
    }

    /// Expanded, deduplicated ports.
    pub fn port_list(&self) -> &[u16] {
        &self.port_list
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

/// Raw, unvalidated input as collected by a front-end. Every field is text;
/// numeric hints that do not parse fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanForm {
    pub address: Option<String>,
    pub cidr: Option<String>,
    pub range: Option<String>,
    pub ports: String,
    #[serde(deserialize_with = "lenient_text")]
    pub concurrency: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub timeout_ms: Option<String>,
}

/// Accept either a JSON string or a bare number for a text field.
fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl ScanForm {
    pub fn validate(&self) -> Result<ScanRequest, ValidationError> {
        let filled = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let candidates = [
            ("address", filled(&self.address)),
            ("cidr", filled(&self.cidr)),
            ("range", filled(&self.range)),
        ];
        let set: Vec<(&str, String)> = candidates
            .into_iter()
            .filter_map(|(name, v)| v.map(|v| (name, v)))
            .collect();

        let target = match set.as_slice() {
            [] => return Err(ValidationError::MissingTarget),
            [("address", v)] => Target::parse_address(v)?,
            [("cidr", v)] => Target::parse_cidr(v)?,
            [(_, v)] => Target::parse_range(v)?,
            many => {
                let names: Vec<&str> = many.iter().map(|(n, _)| *n).collect();
                return Err(ValidationError::ConflictingTargets(names.join(", ")));
            }
        };

        let concurrency = parse_hint(self.concurrency.as_deref()).unwrap_or(DEFAULT_CONCURRENCY);
        let timeout_ms = parse_hint(self.timeout_ms.as_deref()).unwrap_or(DEFAULT_TIMEOUT_MS);
        ScanRequest::new(target, &self.ports, concurrency, timeout_ms)
    }
}

fn parse_hint<T: std::str::FromStr + PartialEq + Default>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|s| s.trim().parse::<T>().ok())
        .filter(|v| *v != T::default())
}
