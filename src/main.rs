// sentinel-replay: feed a recorded trace through a detection session and
// print the resulting assessment. Capture stays with external collectors;
// this binary only replays what they recorded.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use session_sentinel::config::DetectionConfig;
use session_sentinel::session::DetectionSession;
use session_sentinel::telemetry::RecordedTrace;

#[derive(Parser, Debug)]
#[command(name = "sentinel-replay")]
#[command(about = "Replay a recorded session trace through the risk-scoring engine")]
struct Args {
    /// Path to the recorded trace (JSON)
    trace: PathBuf,

    /// Optional detection configuration (TOML); defaults otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print per-session metrics alongside the assessment
    #[arg(long)]
    metrics: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DetectionConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DetectionConfig::default(),
    };

    let raw = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("reading trace from {}", args.trace.display()))?;
    let trace: RecordedTrace = serde_json::from_str(&raw).context("parsing trace JSON")?;
    trace.validate().context("trace failed validation")?;

    info!(
        samples = trace.samples.len(),
        latency_pairs = trace.latency.len(),
        "replaying trace"
    );

    let mut session = DetectionSession::new(trace.label.as_deref(), config);
    session.set_environment(trace.environment.clone());
    for pair in &trace.latency {
        session.record_latency(*pair);
    }
    for sample in &trace.samples {
        session.ingest(*sample);
    }

    let assessment = session.evaluate_cycle().clone();
    println!("{}", serde_json::to_string_pretty(&assessment)?);

    if args.metrics {
        println!("{}", serde_json::to_string_pretty(session.metrics())?);
    }

    Ok(())
}
