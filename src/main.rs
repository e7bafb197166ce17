mod broker;
mod config;
mod engine;
mod error;
mod finite;
mod forecast;
mod http_retry;
mod mapper;
mod market;
mod notifications;
mod observation;
mod registry;
mod resolver;
mod sizer;
mod snapshot;
mod toggles;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use config::EngineConfig;
use engine::DynamicEngine;
use notifications::TelegramNotifier;
use registry::StationRegistry;
use resolver::TradeResolver;

#[derive(Parser)]
#[command(name = "weather-edge-engine", about = "Dynamic weather prediction-market trading engine")]
struct Cli {
    /// Root directory for snapshots and the paper ledger.
    #[arg(long, global = true, default_value = "data")]
    data_root: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dynamic engine's cooperative scheduling loop.
    DynamicPaper {
        /// Comma-separated station codes to trade, e.g. "KNYC,KORD".
        #[arg(long, value_delimiter = ',')]
        stations: Vec<String>,
    },
    /// Resolve a day's ledger against settled market outcomes.
    Resolve {
        /// Event day to resolve, YYYY-MM-DD.
        #[arg(long)]
        date: chrono::NaiveDate,
        /// Restrict resolution to a single station code.
        #[arg(long)]
        station: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv_override();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_edge_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load().context("loading engine configuration")?;
    let registry = StationRegistry::load().context("loading station registry")?;

    match cli.command {
        Commands::DynamicPaper { stations } => {
            if stations.is_empty() {
                anyhow::bail!("--stations must name at least one station code");
            }
            for code in &stations {
                registry.get(code).context("validating --stations")?;
            }

            let mut engine = DynamicEngine::new(config, registry, stations, cli.data_root)?;

            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received, finishing current cycle step");
                    let _ = tx.send(true);
                }
            });

            info!("dynamic engine starting");
            if let Err(e) = engine.run(rx).await {
                error!(error = %e, "dynamic engine aborted");
                return Err(e.into());
            }
            info!(state = ?engine.state(), "dynamic engine stopped");
        }
        Commands::Resolve { date, station } => {
            let market_client = market::MarketClient::new(&config)?;
            let resolver = TradeResolver::new(&market_client, cli.data_root);
            let notifier = TelegramNotifier::new();

            let report = resolver.resolve(date, station.as_deref()).await?;
            notifier.notify_resolution(&report).await;
            info!(
                resolved = report.rows_resolved,
                already_terminal = report.rows_already_terminal,
                left_pending = report.rows_left_pending,
                groups_unresolved = report.groups_unresolved,
                "resolution complete"
            );
        }
    }

    Ok(())
}
