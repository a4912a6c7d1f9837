//! Mailroom CLI - Single entrypoint for all services
//!
//! This application orchestrates the library crates and provides the
//! delivery worker process plus administrative commands.

mod commands;

use clap::{Parser, Subcommand};
use commands::{ApiKeyCommand, EmailsCommand, SendCommand, WorkerCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MAILROOM_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "MAILROOM_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery worker pool
    Worker(WorkerCommand),
    /// API key management commands
    ApiKey(ApiKeyCommand),
    /// Inspect the email ledger
    Emails(EmailsCommand),
    /// Submit a single email through the intake path
    Send(SendCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone();

    // If RUST_LOG is set, use it directly; otherwise use our default filter
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?
    } else {
        // Mailroom crates at the chosen level, noisy dependencies at warn
        tracing_subscriber::EnvFilter::new(format!(
            "mailroom_cli={level},\
             mailroom_core={level},\
             mailroom_auth={level},\
             mailroom_queue={level},\
             mailroom_delivery={level},\
             mailroom_email={level},\
             mailroom_entities={level},\
             mailroom_database={level},\
             mailroom_migrations={level},\
             sqlx=warn,\
             sea_orm=warn,\
             lettre=warn,\
             rustls=warn",
            level = log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global default subscriber: {}", e))?;

    match cli.command {
        Commands::Worker(worker_cmd) => worker_cmd.execute(),
        Commands::ApiKey(api_key_cmd) => api_key_cmd.execute(),
        Commands::Emails(emails_cmd) => emails_cmd.execute(),
        Commands::Send(send_cmd) => send_cmd.execute(),
    }
}
