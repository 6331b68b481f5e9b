//! Vitrine CLI - Interactive storefront client.
//!
//! # Usage
//!
//! ```bash
//! # Start the interactive shell (default)
//! vitrine
//! vitrine shell
//!
//! # List products in stock, optionally filtered by name
//! vitrine products
//! vitrine products café
//!
//! # Show the promotions strip
//! vitrine promotions
//! ```
//!
//! # Environment Variables
//!
//! - `VITRINE_API_URL` - Backend base URL
//! - `VITRINE_STATE_FILE` - Where the cart and session are persisted
//! - `SENTRY_DSN` - Error reporting (optional)
//! - `RUST_LOG` - Log filter (defaults to `vitrine_storefront=info`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitrine_storefront::{Storefront, StorefrontConfig};

mod commands;
mod render;

use commands::CliError;
use commands::shell::Shell;

#[derive(Parser)]
#[command(name = "vitrine")]
#[command(author, version, about = "Vitrine storefront client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive shell
    Shell,
    /// List products in stock
    Products {
        /// Filter by name (case-insensitive substring)
        query: Vec<String>,
    },
    /// List products on promotion
    Promotions,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Map tracing levels to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        tracing::Level::TRACE => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Configuration first: the Sentry DSN comes from it
    let config = StorefrontConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vitrine_storefront=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli, config: StorefrontConfig) -> Result<(), CliError> {
    let app = Storefront::connect(config)?;
    let mut out = std::io::stdout();

    match cli.command.unwrap_or(Commands::Shell) {
        Commands::Shell => {
            Shell::new(app, out)
                .run(BufReader::new(tokio::io::stdin()))
                .await?;
        }
        Commands::Products { query } => {
            commands::products::list(&app, &query.join(" "), &mut out).await?;
        }
        Commands::Promotions => commands::products::promotions(&app, &mut out).await?,
    }
    Ok(())
}
