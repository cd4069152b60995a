//! Just One Dollar CLI - Database migrations and order reports.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! jod-cli migrate
//!
//! # List orders still awaiting payment after 24 hours
//! jod-cli orders stale --older-than-hours 24
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "jod-cli")]
#[command(author, version, about = "Just One Dollar CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Inspect orders
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
}

#[derive(Subcommand)]
enum OrdersAction {
    /// List pending orders whose payment never completed
    Stale {
        /// Only orders created at least this many hours ago
        #[arg(long, default_value_t = 24)]
        older_than_hours: i64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Orders { action } => match action {
            OrdersAction::Stale { older_than_hours } => {
                commands::orders::stale(older_than_hours).await?;
            }
        },
    }
    Ok(())
}
