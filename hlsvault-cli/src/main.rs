mod cli;
mod config;
mod error;
mod logging;

use std::process;
use std::time::Instant;

use clap::Parser;
use hlsvault_engine::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    cli::{Args, Commands},
    config::AppConfig,
    error::Result,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    let _guard = logging::init_logging(args.verbose, args.quiet, config.log_dir(&args))?;
    let engine_config = config.into_engine_config(&args)?;
    info!(
        root = %engine_config.storage.root_dir.display(),
        concurrency = engine_config.pool.concurrency,
        max_errors = engine_config.pool.max_error_threshold,
        "Starting hlsvault"
    );

    let engine = Engine::new(engine_config).await?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            signal_token.cancel();
        }
    });

    let started = Instant::now();
    match args.command {
        Commands::Download { input, token: credential } => {
            let summary = engine
                .process_input_with_cancel(&input, credential.as_deref(), &token)
                .await?;
            info!(
                total = summary.total_records,
                succeeded = summary.success_count,
                failed = summary.error_count,
                journaled = summary.journaled_count,
                "Input list processed"
            );
        }
        Commands::Retry { token: credential } => {
            let summary = engine
                .retry_with_cancel(credential.as_deref(), &token)
                .await?;
            info!(
                records = summary.records,
                resolved = summary.resolved,
                remaining = summary.remaining,
                malformed = summary.malformed,
                "Retry pass finished"
            );
        }
    }

    info!(elapsed = ?started.elapsed(), "Done");
    Ok(())
}
