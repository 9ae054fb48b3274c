use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanctl::config::{Config, DEFAULT_BASE_URL};
use scanctl::controller::{ControllerState, JobEvent, ScanJobController};
use scanctl::transport::{self, RemoteServiceTransport, TransportKind};
use scanctl::types::ScanResult;
use scanctl::{artifacts, decode, report, request::ScanForm, server};

/// scanctl: start, follow and report port scans run by an external worker.
#[derive(Debug, Parser)]
#[command(
    name = "scanctl",
    version,
    about = "Start, follow and report port scans run by an external worker (local executable or HTTP service).",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    worker: WorkerArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct WorkerArgs {
    /// Path to the local worker executable.
    #[arg(long, env = "SCANCTL_WORKER", default_value = "scanner", global = true)]
    worker: PathBuf,

    /// Fixed result file for the local worker (default: a per-job file in the temp dir).
    #[arg(long, env = "SCANCTL_OUTPUT", global = true)]
    output: Option<PathBuf>,

    /// Base URL of the remote scan service.
    #[arg(long = "base-url", env = "SCANCTL_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Status poll interval in milliseconds (default: 200 local, 2000 remote).
    #[arg(long = "poll-ms", global = true)]
    poll_ms: Option<u64>,

    /// How long to wait for the local result file after the worker exits, in milliseconds.
    #[arg(long = "file-wait-ms", default_value_t = 5000, global = true)]
    file_wait_ms: u64,

    /// Give up on a job after this many seconds (0 disables the limit).
    #[arg(long = "job-timeout-secs", default_value_t = 1800, global = true)]
    job_timeout_secs: u64,

    /// Directory for the report JSON/HTML copies.
    #[arg(long = "artifact-dir", env = "SCANCTL_ARTIFACT_DIR", global = true)]
    artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scan job and print its report.
    Scan(ScanArgs),
    /// Fetch the remote service's latest report without starting a job.
    Report,
    /// Serve the HTTP front-end.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8090")]
        bind: String,
        #[arg(long, value_enum, default_value_t = TransportKind::Remote)]
        transport: TransportKind,
    },
    /// Show what this tool does.
    About,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(long, value_enum, default_value_t = TransportKind::Local)]
    transport: TransportKind,

    /// Single host address.
    #[arg(long)]
    address: Option<String>,

    /// CIDR block, e.g. 192.168.1.0/24.
    #[arg(long)]
    cidr: Option<String>,

    /// IPv4 range, e.g. 192.168.1.10-192.168.1.20.
    #[arg(long)]
    range: Option<String>,

    /// Ports, e.g. 1-1024 or 22,80,443.
    #[arg(long, default_value = "1-1024")]
    ports: String,

    /// Concurrent probes hint (falls back to 200).
    #[arg(long)]
    concurrency: Option<String>,

    /// Per-probe timeout in milliseconds (falls back to 1500).
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<String>,

    /// Skip writing the JSON/HTML copies.
    #[arg(long = "no-artifacts", default_value_t = false)]
    no_artifacts: bool,
}

impl WorkerArgs {
    fn to_config(&self) -> Config {
        let mut config = Config::default();
        config.local.worker_path = self.worker.clone();
        config.local.output_path = self.output.clone();
        config.local.file_wait_timeout = Duration::from_millis(self.file_wait_ms);
        config.remote.base_url = self.base_url.clone();
        if let Some(ms) = self.poll_ms {
            config.local.poll_interval = Duration::from_millis(ms);
            config.remote.poll_interval = Duration::from_millis(ms);
        }
        config.controller.job_timeout =
            (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs));
        if let Some(dir) = &self.artifact_dir {
            config.artifact_dir = dir.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanctl=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.worker.to_config();

    match cli.command {
        Command::Scan(args) => run_scan(args, config).await,
        Command::Report => fetch_report(config).await,
        Command::Serve { bind, transport } => {
            println!("Front-end at http://{bind} using the {transport:?} worker (Ctrl+C to stop)");
            let state = server::AppState::new(transport, config);
            tokio::select! {
                res = server::spawn_server(&bind, state) => res,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
        Command::About => {
            println!("{}", server::ABOUT);
            Ok(())
        }
    }
}

async fn run_scan(args: ScanArgs, config: Config) -> Result<()> {
    let form = ScanForm {
        address: args.address,
        cidr: args.cidr,
        range: args.range,
        ports: args.ports,
        concurrency: args.concurrency,
        timeout_ms: args.timeout_ms,
    };
    let request = form.validate().context("invalid scan input")?;

    println!("scanctl configuration:");
    println!("  transport    : {:?}", args.transport);
    println!("  target       : {}", request.target());
    println!("  ports        : {}", request.ports());
    println!("  concurrency  : {}", request.concurrency());
    println!("  timeout_ms   : {}", request.timeout_ms());

    let transport = transport::build(args.transport, &config)?;
    let controller = ScanJobController::new(transport, config.controller.clone());
    let mut events = controller.subscribe();
    controller.start(request)?;

    let done = controller.wait();
    tokio::pin!(done);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let end = loop {
        tokio::select! {
            end = &mut done => break end,
            ev = events.recv() => match ev {
                Ok(ev) => print_event(&ev),
                Err(RecvError::Lagged(n)) => warn!("skipped {n} progress events"),
                Err(RecvError::Closed) => {}
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                println!("Interrupted; stopping job...");
                controller.cancel();
            }
        }
    };
    while let Ok(ev) = events.try_recv() {
        print_event(&ev);
    }

    match end {
        ControllerState::Completed { result } => {
            print_report(&result);
            if !args.no_artifacts {
                write_artifacts(&config, &result);
            }
            Ok(())
        }
        ControllerState::TimedOut { reason } => {
            bail!("scan timed out: {reason} (the worker may still be running)")
        }
        ControllerState::Failed { reason } => bail!("scan failed: {reason}"),
        other => bail!("scan ended in unexpected state {}", other.label()),
    }
}

async fn fetch_report(config: Config) -> Result<()> {
    let remote = RemoteServiceTransport::new(&config.remote)?;
    println!("Fetching report from {} ...", remote.base_url());
    let raw = remote.fetch_report().await?;
    let result = decode::decode(&raw).context("report from service could not be decoded")?;
    print_report(&result);
    write_artifacts(&config, &result);
    Ok(())
}

fn write_artifacts(config: &Config, result: &ScanResult) {
    match artifacts::persist(&config.artifact_dir, result, &report::generation_timestamp()) {
        Ok(paths) => {
            println!("Wrote JSON report to {}", paths.json.display());
            println!("Wrote HTML report to {}", paths.html.display());
        }
        Err(e) => eprintln!("Failed to write report files: {e:#}"),
    }
}

fn print_event(ev: &JobEvent) {
    match ev {
        JobEvent::StateChanged(ControllerState::Running { status, polls, .. }) => {
            println!("  ... {:?} (poll #{polls})", status)
        }
        JobEvent::StateChanged(state) => println!("State: {}", state.label()),
        JobEvent::WorkerOutput { stream, line } => println!("  [{stream}] {line}"),
        JobEvent::RemoteProgress(s) if s.running => println!("  ... running (hosts={})", s.hosts),
        JobEvent::RemoteProgress(_) => {}
        JobEvent::TransientError(msg) => eprintln!("Warning: {msg}; retrying"),
        JobEvent::DecodeFailed(msg) => eprintln!("Worker output unreadable: {msg}"),
        JobEvent::Notice(msg) => println!("Note: {msg}"),
    }
}

fn print_report(result: &ScanResult) {
    let summary = report::summarize(result);
    let mut ip_w = "ip".len();
    let mut banner_w = "banner".len();
    for h in result.hosts() {
        ip_w = ip_w.max(h.ip.len());
        for p in &h.ports {
            banner_w = banner_w.max(p.banner.len().min(60));
        }
    }
    let port_w = 5usize;
    let open_w = "open".len();

    println!(
        "\nHosts: {} (open ports: {})",
        summary.len(),
        summary.total_open()
    );
    for row in &summary.hosts {
        println!("  {:<ip_w$}  {} open", row.ip, row.open_count, ip_w = ip_w);
    }
    if result.is_empty() {
        return;
    }

    println!(
        "\n{:<ip_w$}  {:>port_w$}  {:<open_w$}  {:<banner_w$}",
        "ip",
        "port",
        "open",
        "banner",
        ip_w = ip_w,
        port_w = port_w,
        open_w = open_w,
        banner_w = banner_w
    );
    println!(
        "{:-<ip_w$}  {:-<port_w$}  {:-<open_w$}  {:-<banner_w$}",
        "",
        "",
        "",
        "",
        ip_w = ip_w,
        port_w = port_w,
        open_w = open_w,
        banner_w = banner_w
    );
    for h in result.hosts() {
        for p in h.ports.iter().filter(|p| p.open) {
            let bsnip: String = p.banner.chars().take(60).collect();
            println!(
                "{:<ip_w$}  {:>port_w$}  {:<open_w$}  {:<banner_w$}",
                h.ip,
                p.port,
                "yes",
                bsnip,
                ip_w = ip_w,
                port_w = port_w,
                open_w = open_w,
                banner_w = banner_w
            );
        }
    }
}
