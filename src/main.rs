mod cli;
mod handlers;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use coursedl::config::ConfigManager;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Validate CLI arguments first
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let verbose = args.verbose;
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let mut config_manager = match &args.config {
        Some(path) => ConfigManager::with_file(path.clone())?,
        None => ConfigManager::new()?,
    };

    if !args.skips_config_validation() {
        if let Err(e) = config_manager.validate() {
            eprintln!("Configuration validation failed: {}", e);
            eprintln!("Run 'coursedl config show' to inspect it or 'coursedl config reset' to start over");
            process::exit(1);
        }
    }

    match args.command {
        Commands::Download {
            sheet,
            output,
            chapters,
            skip_first,
            port,
            report,
        } => {
            let complete = handlers::handle_download(
                config_manager.config(),
                sheet,
                output,
                chapters,
                skip_first,
                port,
                report,
                verbose,
            )
            .await?;
            if !complete {
                process::exit(2);
            }
        }
        Commands::Report {
            sheet,
            output,
            chapters,
            skip_first,
            port,
        } => {
            handlers::handle_report(
                config_manager.config(),
                sheet,
                output,
                chapters,
                skip_first,
                port,
            )
            .await?;
        }
        Commands::Config { action } => {
            handlers::handle_config(&mut config_manager, action).await?;
        }
    }

    Ok(())
}
