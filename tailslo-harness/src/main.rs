use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tailslo_client::{ClientConfig, StreamingClient, DEFAULT_ENDPOINT};
use tailslo_harness::config::{
    load_payload, request_timeout, ReplayConfig, DEFAULT_BASE_URL, DEFAULT_CONCURRENCY, DEFAULT_SLO_S,
    DEFAULT_WINDOW_S, READY_TIMEOUT, STOP_GRACE,
};
use tailslo_harness::metrics::{summarize, window_series};
use tailslo_harness::replay::ReplayEngine;
use tailslo_harness::report;
use tailslo_harness::service::{
    stop_group, wait_ready, LaunchConfig, ServiceProcess, StopOutcome,
};
use tailslo_harness::workload::{BurstWorkload, PoissonWorkload, Workload};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tailslo", about = "Tail-latency SLO harness for streaming generation services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a synthetic arrival schedule and report TTFT/E2E against an SLO
    Run(RunArgs),
    /// Start a service in its own process group and wait until it is ready
    Launch(LaunchArgs),
    /// Terminate a launched service's process group
    Stop(StopArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Poisson,
    Burst,
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Arrival model
    #[arg(long, value_enum, default_value_t = Mode::Poisson)]
    mode: Mode,

    /// Poisson: mean arrivals per second
    #[arg(long, default_value_t = 2.0)]
    qps: f64,

    /// Poisson: run length (seconds)
    #[arg(long, default_value_t = 60.0)]
    duration: f64,

    /// Burst: arrivals per second during ON windows
    #[arg(long, default_value_t = 8.0)]
    qps_on: f64,

    /// Burst: arrivals per second during OFF windows
    #[arg(long, default_value_t = 1.0)]
    qps_off: f64,

    /// Burst: ON window length (seconds)
    #[arg(long, default_value_t = 15.0)]
    on_s: f64,

    /// Burst: OFF window length (seconds)
    #[arg(long, default_value_t = 60.0)]
    off_s: f64,

    /// Burst: number of ON/OFF cycles
    #[arg(long, default_value_t = 5)]
    cycles: u32,

    /// Seed for the arrival schedule
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Maximum requests in flight
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// E2E latency SLO (seconds)
    #[arg(long, default_value_t = DEFAULT_SLO_S)]
    slo: f64,

    /// Bucket width of the burst time series (seconds)
    #[arg(long, default_value_t = DEFAULT_WINDOW_S)]
    window: f64,

    /// Per-request timeout (seconds); unlimited when omitted
    #[arg(long)]
    timeout: Option<f64>,

    /// JSON file with the request body template
    #[arg(long)]
    payload: Option<PathBuf>,

    /// Wait for this URL to answer 200 before the first request
    #[arg(long)]
    health_url: Option<String>,

    /// How long to wait for --health-url (seconds)
    #[arg(long, default_value_t = READY_TIMEOUT.as_secs())]
    ready_timeout: u64,

    #[arg(long, default_value = "results")]
    outdir: PathBuf,
}

impl RunArgs {
    fn workload(&self) -> Workload {
        match self.mode {
            Mode::Poisson => Workload::Poisson(PoissonWorkload {
                qps: self.qps,
                duration_s: self.duration,
                seed: self.seed,
            }),
            Mode::Burst => Workload::Burst(BurstWorkload {
                qps_on: self.qps_on,
                qps_off: self.qps_off,
                on_s: self.on_s,
                off_s: self.off_s,
                cycles: self.cycles,
                seed: self.seed,
            }),
        }
    }
}

#[derive(clap::Args)]
struct LaunchArgs {
    /// Port the service listens on
    #[arg(long, default_value_t = 30000)]
    port: u16,

    /// Health check URL. Default: http://127.0.0.1:<port>/v1/models
    #[arg(long)]
    health_url: Option<String>,

    #[arg(long, default_value = "logs")]
    logdir: PathBuf,

    /// Readiness deadline (seconds)
    #[arg(long, default_value_t = READY_TIMEOUT.as_secs())]
    ready_timeout: u64,

    /// Service command and its arguments
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

#[derive(clap::Args)]
struct StopArgs {
    #[arg(long)]
    pid: u32,

    /// Seconds between SIGTERM and SIGKILL
    #[arg(long, default_value_t = STOP_GRACE.as_secs())]
    grace: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Launch(args) => launch(args).await,
        Command::Stop(args) => stop(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let workload = args.workload();
    let schedule = workload.schedule().context("invalid workload parameters")?;
    info!(
        tag = %workload.tag(),
        requests = schedule.len(),
        duration_s = workload.duration_s(),
        "schedule generated"
    );

    let payload = load_payload(args.payload.as_deref()).context("failed to load payload")?;
    let timeout = request_timeout(args.timeout).context("invalid --timeout")?;

    if let Some(url) = &args.health_url {
        wait_ready(url, Duration::from_secs(args.ready_timeout)).await?;
    }

    let client = StreamingClient::new(ClientConfig {
        base_url: args.base_url.clone(),
        endpoint: args.endpoint.clone(),
        timeout,
    });
    let engine = ReplayEngine::new(client, ReplayConfig { concurrency: args.concurrency })?;
    let outcome = engine.replay(&schedule, &payload).await?;

    if !schedule.is_empty() && outcome.records.is_empty() {
        warn!(failed = outcome.failures.len(), "every request failed; statistics are undefined");
    }

    let summary = summarize(&outcome.records, args.slo);
    let series = if workload.is_burst() {
        Some(window_series(&outcome.records, args.slo, args.window)?)
    } else {
        None
    };

    let paths = report::save_run(&args.outdir, &workload.tag(), &outcome.records, &summary, series.as_deref())
        .with_context(|| format!("failed to write results to {}", args.outdir.display()))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("raw={}", paths.raw.display());
    println!("summary={}", paths.summary.display());
    if let Some(series) = &paths.series {
        println!("series={}", series.display());
    }
    Ok(())
}

async fn launch(args: LaunchArgs) -> Result<()> {
    let (program, rest) = args.command.split_first().context("missing service command")?;
    let config = LaunchConfig {
        program: program.clone(),
        args: rest.to_vec(),
        log_path: args.logdir.join(format!("service_{}.log", args.port)),
    };

    let base = format!("http://127.0.0.1:{}", args.port);
    let health_url = args.health_url.clone().unwrap_or_else(|| format!("{base}/v1/models"));

    let service = ServiceProcess::launch(&config)?;
    // On failure `service` drops here and takes its process group down with it.
    wait_ready(&health_url, Duration::from_secs(args.ready_timeout)).await?;
    let pid = service.detach();

    println!("SERVER_PID={pid}");
    println!("BASE_URL={base}");
    println!("HEALTH_URL={health_url}");
    println!("LOG={}", config.log_path.display());
    Ok(())
}

async fn stop(args: StopArgs) -> Result<()> {
    let outcome = stop_group(args.pid, Duration::from_secs(args.grace)).await?;
    match outcome {
        StopOutcome::NotFound => println!("Process not found."),
        StopOutcome::Exited => println!("Process exited."),
        StopOutcome::Killed => println!("Sent SIGKILL to process group of {}", args.pid),
    }
    Ok(())
}
