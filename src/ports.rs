use anyhow::{bail, Context, Result};
use std::collections::HashSet;

/// Parse a port expression into a deduplicated list of TCP ports (1..=65535).
///
/// Supported forms, freely mixed:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - items separated by commas and/or whitespace: `22, 80 443,8000-8002`
///
/// Order of first appearance is preserved.
pub fn parse_port_expr(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    let items = s
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty());

    for item in items {
        if let Some((a, b)) = item.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("invalid start in range: {item}"))?;
            let end = parse_port_str(b.trim())
                .with_context(|| format!("invalid end in range: {item}"))?;
            if start > end {
                bail!("invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(item).with_context(|| format!("invalid port value: {item}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    if out.is_empty() {
        bail!("no ports given");
    }
    Ok(out)
}

/// Render a port list the way the worker's `-ports` flag accepts it: a single
/// `start-end` range when the list is one ascending run, a comma list otherwise.
pub fn worker_port_arg(ports: &[u16]) -> String {
    let contiguous = ports.windows(2).all(|w| w[1] == w[0].wrapping_add(1));
    match (ports.first(), ports.last()) {
        (Some(first), Some(last)) if contiguous && ports.len() > 1 => format!("{first}-{last}"),
        _ => ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
