//! Summaries and rendered HTML documents derived from a [`ScanResult`].
//!
//! Both are pure functions of their input. The only varying part of a
//! rendered document is the generation timestamp, which callers pass in;
//! [`render_now`] fills it from [`generation_timestamp`].

use ::time::{format_description::well_known, OffsetDateTime};

use crate::types::{HostSummary, ReportSummary, ScanResult};

/// Open-port count per host, in result order.
pub fn summarize(result: &ScanResult) -> ReportSummary {
    ReportSummary {
        hosts: result
            .hosts()
            .iter()
            .map(|h| HostSummary {
                ip: h.ip.clone(),
                open_count: h.open_count(),
            })
            .collect(),
    }
}

/// Render a self-contained HTML report stamped with `generated_at`.
pub fn render(result: &ScanResult, generated_at: &str) -> String {
    let hosts_html: String = result
        .hosts()
        .iter()
        .map(|host| {
            let rows: String = host
                .ports
                .iter()
                .map(|p| {
                    format!(
                        "\n<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                        p.port,
                        if p.open { "open" } else { "closed" },
                        html_escape(&p.banner)
                    )
                })
                .collect();
            format!(
                r#"
<h2>Host: {ip}</h2>
<p>{open} open of {total} probed</p>
<table>
<thead><tr><th>Port</th><th>State</th><th>Banner</th></tr></thead>
<tbody>{rows}
</tbody>
</table>"#,
                ip = html_escape(&host.ip),
                open = host.open_count(),
                total = host.ports.len(),
            )
        })
        .collect();

    let body = if result.is_empty() {
        "\n<p>No hosts reported.</p>".to_string()
    } else {
        hosts_html
    };

    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Scan Report</title>
<style>
body{{font-family: Arial, sans-serif;}}
table{{border-collapse: collapse;width:100%;}}
th,td{{border:1px solid #ddd;padding:8px}}
th{{background:#f4f4f4}}
</style>
</head>
<body>
<h1>Scan Report</h1>
<p>Generated: {generated}</p>
<p>Hosts: {hosts}</p>{body}
</body>
</html>
"#,
        generated = html_escape(generated_at),
        hosts = result.len(),
    )
}

/// [`render`] stamped with the current time.
pub fn render_now(result: &ScanResult) -> String {
    render(result, &generation_timestamp())
}

/// Current UTC time, RFC 3339.
pub fn generation_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
