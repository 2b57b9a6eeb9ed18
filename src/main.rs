use anyhow::{Context, Result};
use clap::Parser;
use linkspeed::speedtest::transport::HttpTransport;
use linkspeed::{ChannelSink, Phase, PhaseResults, RunOutcome, Settings, TestOrchestrator, TestUpdate};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "linkspeed",
    about = "Measure latency, jitter, download and upload speed against a speed-test server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the speed-test API (ping, download and upload live under it)
    #[arg(long, env = "LINKSPEED_ENDPOINT")]
    endpoint: Option<String>,

    /// TOML file with settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Probes per ping and jitter phase
    #[arg(long)]
    probes: Option<usize>,

    /// Download phase budget in seconds
    #[arg(long)]
    download_secs: Option<u64>,

    /// Upload phase budget in seconds
    #[arg(long)]
    upload_secs: Option<u64>,

    /// Upload payload size in KiB
    #[arg(long)]
    chunk_kib: Option<usize>,

    /// Read a single download stream instead of reopening until the budget is spent
    #[arg(long)]
    single_stream: bool,

    /// Print the final results as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Settings::default(),
        };

        if let Some(endpoint) = &self.endpoint {
            settings.endpoint = endpoint.clone();
        }
        if let Some(probes) = self.probes {
            settings.probe_count = probes;
        }
        if let Some(secs) = self.download_secs {
            settings.download_budget_ms = secs
                .checked_mul(1_000)
                .with_context(|| format!("--download-secs {} is too large", secs))?;
        }
        if let Some(secs) = self.upload_secs {
            settings.upload_budget_ms = secs
                .checked_mul(1_000)
                .with_context(|| format!("--upload-secs {} is too large", secs))?;
        }
        if let Some(kib) = self.chunk_kib {
            settings.upload_chunk_bytes = kib
                .checked_mul(1024)
                .with_context(|| format!("--chunk-kib {} is too large", kib))?;
        }
        if self.single_stream {
            settings.download_mode = linkspeed::DownloadMode::SingleStream;
        }

        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Serialize)]
struct Report<'a> {
    endpoint: &'a str,
    completed: bool,
    results: PhaseResults,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.settings()?;
    tracing::info!(endpoint = %settings.endpoint, "starting speed test");

    let transport = HttpTransport::new(&settings).context("building HTTP client")?;
    let (sink, mut update_rx) = ChannelSink::new();
    let orchestrator = TestOrchestrator::new(Arc::new(transport), settings.clone(), Arc::new(sink))?;

    let runner = orchestrator.clone();
    let mut run = tokio::spawn(async move { runner.start().await });

    let mut console = Console::new(cli.json);
    let mut stopping = false;
    // Created once for the whole run.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let outcome = loop {
        tokio::select! {
            Some(update) = update_rx.recv() => console.handle(update),
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                orchestrator.stop();
            }
            joined = &mut run => break joined?,
        }
    };
    while let Ok(update) = update_rx.try_recv() {
        console.handle(update);
    }

    let (completed, results) = match outcome {
        Ok(RunOutcome::Completed(results)) => (true, results),
        Ok(RunOutcome::Cancelled) => (false, orchestrator.snapshot().results),
        Err(err) => return Err(err).context("speed test failed"),
    };

    if cli.json {
        let report = Report {
            endpoint: &settings.endpoint,
            completed,
            results,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(completed, &results);
    }

    Ok(())
}

struct Console {
    quiet: bool,
    phase: Phase,
}

impl Console {
    fn new(quiet: bool) -> Self {
        Self { quiet, phase: Phase::Idle }
    }

    fn handle(&mut self, update: TestUpdate) {
        match update {
            TestUpdate::PhaseChanged(phase) => self.phase = phase,
            TestUpdate::LiveSpeed(value) if self.phase.is_measuring() && value > 0.0 => {
                self.line(format!("{:<10}{:>10.2} {}", self.phase, value, self.phase.unit()), false);
            }
            TestUpdate::PhaseResult { phase, value: Some(value) } => {
                self.line(format!("{:<10}{:>10.2} {}", phase, value, phase.unit()), true);
            }
            TestUpdate::Failed(message) => {
                if !self.quiet {
                    println!();
                }
                eprintln!("error: {}", message);
            }
            _ => {}
        }
    }

    fn line(&self, text: String, done: bool) {
        if self.quiet {
            return;
        }
        let mut out = std::io::stdout();
        let _ = write!(out, "\r{:<32}", text);
        if done {
            let _ = writeln!(out);
        }
        let _ = out.flush();
    }
}

fn print_summary(completed: bool, results: &PhaseResults) {
    let fmt = |value: Option<f64>, unit: &str| match value {
        Some(v) => format!("{:.2} {}", v, unit),
        None => "—".to_string(),
    };

    println!();
    println!("{}", if completed { "Test complete" } else { "Test stopped" });
    println!("  ping      {}", fmt(results.ping_ms, "ms"));
    println!("  jitter    {}", fmt(results.jitter_ms, "ms"));
    println!("  download  {}", fmt(results.download_mbps, "Mbps"));
    println!("  upload    {}", fmt(results.upload_mbps, "Mbps"));
}
