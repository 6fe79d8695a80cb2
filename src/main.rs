//! queuectl - persistence-backed background job queue.
//!
//! Main entry point for the queuectl CLI.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let db = match cli.db {
        Some(path) => path,
        None => match commands::default_db_path() {
            Ok(path) => path,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
    };

    let result = match cli.command {
        Commands::Enqueue { job_json } => commands::handle_enqueue(&db, &job_json).await,
        Commands::List { state, format } => {
            commands::handle_list(&db, state.as_deref(), &format).await
        }
        Commands::Status => commands::handle_status(&db, None).await,
        Commands::Worker { action } => commands::handle_worker(&db, action).await,
        Commands::Dlq { action } => commands::handle_dlq(&db, action).await,
        Commands::Config { action } => commands::handle_config(&db, action).await,
        Commands::Init => commands::handle_init(&db).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
