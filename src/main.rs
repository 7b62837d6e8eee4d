//! Main entry point for the Marian translation service

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marian_translator::cli::commands::{self, Commands, DEFAULT_HOST, DEFAULT_PORT};

/// Marian translation service - HTTP API over pretrained MarianMT models
#[derive(Parser, Debug)]
#[command(name = "marian-translator", version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("marian_translator={},tower_http={}", log_level, log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Execute command
    match args.command {
        Some(Commands::Serve { host, port }) => {
            commands::handle_serve(host, port).await?;
        }
        Some(Commands::Translate {
            pair,
            text,
            file,
            output,
        }) => {
            commands::handle_translate(pair, text, file, output).await?;
        }
        Some(Commands::Pairs) => {
            commands::handle_pairs().await?;
        }
        None => {
            commands::handle_serve(DEFAULT_HOST.to_string(), DEFAULT_PORT).await?;
        }
    }

    Ok(())
}
