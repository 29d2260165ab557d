mod app;
mod auth;
mod coordinator;
mod cursor;
mod fetcher;
mod fhir;
mod model;
mod sink;
#[cfg(test)]
mod testutil;

use clap::{Parser, Subcommand};
use extractor_core::{telemetry, Config};
use sqlx::postgres::PgPoolOptions;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[clap(name = "extractor")]
#[clap(about = "Epic FHIR incremental extraction service", version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,

    /// Run one extraction job across the configured resource types
    Extract {
        /// Extract only these resource types (comma separated)
        #[clap(long, value_delimiter = ',', env = "EXTRACT_RESOURCE_TYPES")]
        resource_types: Option<Vec<String>>,

        /// Ignore stored watermarks and re-fetch full history
        #[clap(long)]
        full: bool,
    },

    /// Extract on an interval until interrupted
    Run,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load configuration
    let mut config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    let cli = Cli::parse();

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            config.database.connect_timeout_secs,
        ))
        .idle_timeout(std::time::Duration::from_secs(
            config.database.idle_timeout_secs,
        ))
        .connect(&config.database.url)
        .await?;

    match cli.command {
        Commands::Migrate => {
            info!("Running database migrations");
            sqlx::migrate!("../migrations").run(&pool).await?;
            info!("Migrations completed successfully");
        }

        Commands::Extract {
            resource_types,
            full,
        } => {
            if let Some(types) = resource_types {
                config.extract.resource_types = types;
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Invalid resource type override: {}", e))?;
            }

            info!(
                resource_types = ?config.extract.resource_types,
                full,
                "Starting extraction"
            );

            let app = app::App::new(config, pool).await?;
            let report = app.run_extract(full).await;

            let failed = report.failed().count();
            if failed > 0 {
                anyhow::bail!("{failed} resource type(s) failed; see log for causes");
            }
        }

        Commands::Run => {
            info!("Starting polling extraction");
            let app = app::App::new(config, pool).await?;
            app.run_poll().await?;
        }
    }

    Ok(())
}
