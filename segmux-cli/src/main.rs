mod batch;
mod cli;
mod commands;
mod config;
mod error;
mod utils;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
};
use clap::Parser;
use std::process;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json = args.json;
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        if json {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            println!("{error_json}");
        } else {
            error!("{e}");
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    segmux_engine::install_rustls_provider();

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args)?;
    debug!("Effective config: {:?}", config);

    let executor = CommandExecutor::new(config, args.json)?;

    match args.command {
        Commands::Download {
            url,
            output_dir,
            name,
            concurrency,
        } => {
            executor
                .download(&url, output_dir.as_deref(), name.as_deref(), concurrency)
                .await?;
        }
        Commands::Batch {
            input,
            output_dir,
            concurrency,
            skip_existing,
            fingerprint_dirs,
        } => {
            executor
                .batch(
                    &input,
                    output_dir.as_deref(),
                    concurrency,
                    skip_existing,
                    fingerprint_dirs,
                )
                .await?;
        }
    }

    Ok(())
}

// Logs go to stderr so stdout stays clean for reports.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}
