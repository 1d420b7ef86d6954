//! nvsmi-prom: NVIDIA GPU metrics for the Prometheus textfile collector.
//!
//! By default the binary collects once, prints or publishes the document and
//! exits; a non-zero exit status means no document was produced. `--watch`
//! keeps collecting on an interval for setups without an external timer.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error};
use nvsmi_prom::NvidiaGpuCollector;
use nvsmi_prom_core::{write_textfile, Collector, ExporterConfig, ExporterError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

/// Document format written per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Prometheus text exposition format
    Prometheus,
    /// Normalized device snapshots as JSON, for debugging
    Json,
}

/// Command-line arguments for the exporter.
#[derive(Parser)]
#[command(name = "nvsmi-prom")]
#[command(about = "NVIDIA GPU metrics for the Prometheus textfile collector")]
#[command(version)]
#[command(author)]
struct Args {
    /// Publish to this file (atomic replace) instead of printing to stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep collecting on an interval instead of exiting after one run
    #[arg(short, long)]
    watch: bool,

    /// Collection interval in milliseconds for --watch (minimum 100ms)
    #[arg(short, long, value_parser = validate_millis)]
    interval: Option<u64>,

    /// Upper bound on one nvidia-smi run in milliseconds (minimum 100ms)
    #[arg(short, long, value_parser = validate_millis)]
    timeout: Option<u64>,

    /// Diagnostic command to run
    #[arg(long)]
    command: Option<String>,

    /// Metric name prefix
    #[arg(long)]
    namespace: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Prometheus)]
    format: OutputFormat,

    /// Configuration file (defaults to ~/.config/nvsmi-prom/config.ron)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Check collector availability and exit
    #[arg(long)]
    check: bool,

    /// Generate example config file and exit
    #[arg(long)]
    generate_config: bool,

    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

/// Validate that a duration in milliseconds meets the minimum.
fn validate_millis(s: &str) -> Result<u64, String> {
    let millis = s
        .parse::<u64>()
        .map_err(|_| "Value must be a positive integer".to_owned())?;

    if millis < ExporterConfig::MIN_DURATION_MS {
        return Err(format!(
            "Value must be at least {}ms",
            ExporterConfig::MIN_DURATION_MS
        ));
    }

    Ok(millis)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

/// Load the configuration file and apply command line overrides.
fn load_config(args: &Args) -> Result<ExporterConfig> {
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ExporterConfig::load()?,
    };

    if let Some(namespace) = &args.namespace {
        config = config.with_namespace(namespace.clone());
    }
    if let Some(command) = &args.command {
        config = config.with_command(command.clone());
    }
    if let Some(timeout) = args.timeout {
        config = config.with_timeout(Duration::from_millis(timeout));
    }
    if let Some(interval) = args.interval {
        config = config.with_interval(Duration::from_millis(interval));
    }
    if let Some(output) = &args.output {
        config = config.with_output(output.clone());
    }

    config.validate()?;
    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Write a finished document to its destination.
fn publish(output: Option<&Path>, document: &str) -> Result<()> {
    match output {
        Some(path) => write_textfile(path, document)
            .with_context(|| format!("Failed to publish {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(document.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Run one independent collection cycle.
async fn collect_once(collector: &NvidiaGpuCollector, format: OutputFormat) -> Result<()> {
    let document = match format {
        OutputFormat::Prometheus => collector.collect().await?,
        OutputFormat::Json => {
            let snapshots = collector.snapshots().await?;
            let mut json = serde_json::to_string_pretty(&snapshots)?;
            json.push('\n');
            json
        }
    };

    publish(collector.config().output.as_deref(), &document)
}

async fn run(args: Args) -> Result<()> {
    if args.generate_config {
        let config_path = args
            .config
            .clone()
            .or_else(ExporterConfig::default_config_path)
            .context("Could not determine config directory")?;
        ExporterConfig::example_config().save_to_file(&config_path)?;
        println!("Generated example config at: {}", config_path.display());
        return Ok(());
    }

    let collector = NvidiaGpuCollector::new(load_config(&args)?)?;

    if args.check {
        collector
            .check_availability()
            .await
            .context("NVIDIA GPU collector is not available")?;
        println!("NVIDIA GPU collector is available");
        return Ok(());
    }

    if !args.watch {
        return collect_once(&collector, args.format).await;
    }

    let mut interval = time::interval(collector.config().interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        // A failed cycle leaves the previously published document in place.
        if let Err(e) = collect_once(&collector, args.format).await {
            let category = e
                .downcast_ref::<ExporterError>()
                .map_or("other", ExporterError::category);
            error!("Collection failed [{}]: {:#}", category, e);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
