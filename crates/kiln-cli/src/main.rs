//! Kiln CLI entrypoint.

use clap::Parser;
use kiln_cache::{Cache, CacheOutcome};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod backend;
mod settings;

use settings::{Cli, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_format);

    match run(&cli).await {
        Ok(outcome) => {
            info!("{}", outcome.message());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: &Cli) -> kiln_core::Result<CacheOutcome> {
    let cwd = std::env::current_dir()?;
    let settings = cli.resolve(&cwd)?;
    let storage = backend::connect(&settings.backend)?;
    info!(
        mode = settings.operation.mode(),
        backend = storage.name(),
        "Starting cache operation"
    );

    let cache = Cache::new(storage)
        .with_root(settings.root)
        .with_flush_concurrency(settings.flush_concurrency);
    let outcome = cache.execute(settings.operation).await?;

    match &outcome {
        CacheOutcome::Rebuilt(report) => info!(
            key = %report.key,
            bytes = report.bytes,
            checksum = %report.checksum,
            duration_ms = report.duration_ms,
            "Uploaded cache archive"
        ),
        CacheOutcome::Restored(report) => match &report.matched_key {
            Some(key) => info!(
                key = %key,
                fallback = report.used_fallback,
                entries = report.entries,
                duration_ms = report.duration_ms,
                "Cache hit"
            ),
            None => info!("Cache miss"),
        },
        CacheOutcome::Flushed(report) => info!(
            listed = report.listed,
            matched = report.matched,
            deleted = report.deleted,
            "Flush complete"
        ),
    }

    Ok(outcome)
}
