//! Glacier CLI: incremental extraction from a paginated source API to
//! compressed artifacts in object storage.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use glacier::{Config, init_tracing, run_extraction, shutdown_signal};

#[derive(Parser, Debug)]
#[command(version)]
struct CliArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Validate configuration and exit without extracting
    #[arg(long)]
    dry_run: bool,

    /// Override the last successful run timestamp (RFC 3339)
    #[arg(long)]
    last_run: Option<chrono::DateTime<chrono::Utc>>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(last_run) = args.last_run {
        config.extract.last_run = Some(last_run);
    }

    info!(
        tables = config.tables.len(),
        sink = %config.sink.path,
        "Loaded configuration"
    );

    if args.dry_run {
        info!("Configuration valid, dry run requested, exiting");
        return ExitCode::SUCCESS;
    }

    if config.metrics.enabled {
        let addr = match config.metrics.address.parse() {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Invalid metrics address '{}': {e}", config.metrics.address);
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = glacier::metrics::init(addr) {
            eprintln!("Failed to initialize metrics: {e}");
            return ExitCode::FAILURE;
        }
    }

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_for_signal.cancel();
    });

    match run_extraction(&config, shutdown).await {
        Ok(report) if report.stats.units_failed > 0 => {
            eprintln!(
                "Extraction finished with {} failed unit(s)",
                report.stats.units_failed
            );
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Extraction failed: {e}");
            ExitCode::FAILURE
        }
    }
}
