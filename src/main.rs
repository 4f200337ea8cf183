use anyhow::{Context, Result};
use clap::Parser;
use portfolio_engine::config::Config;
use portfolio_engine::data::cache::Cache;
use portfolio_engine::data::portfolio::{FetcherStatus, NetworkId};
use portfolio_engine::fetchers::default_fetchers;
use portfolio_engine::PortfolioEngine;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MEMORY_STORE_CAPACITY: u64 = 100_000;

/// Compute a Solana wallet portfolio with the built-in fetchers
#[derive(Parser, Debug)]
#[command(name = "portfolio-fetch", version)]
struct Args {
    /// Wallet address
    owner: String,

    /// Pretty-print the JSON result
    #[arg(long)]
    pretty: bool,

    /// Run the fetchers this many times (later runs show cache behaviour)
    #[arg(long, default_value_t = 1)]
    runs: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ========================================================================
    // Step 1: Initialize tracing subscriber with EnvFilter
    // ========================================================================
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create EnvFilter")?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    // ========================================================================
    // Step 2: Load configuration and build the engine
    // ========================================================================
    let config = Config::load().context("Failed to load configuration")?;
    info!(
        "Configuration loaded: rpc={}, fetchers_concurrency={}, rpc_concurrency={}, gpa_rps={}",
        config.rpc.url, config.fetchers.concurrency, config.rpc.concurrency, config.rpc.gpa_rps_limit
    );

    let engine = PortfolioEngine::from_config(config, Cache::in_memory(MEMORY_STORE_CAPACITY));
    let fetchers = default_fetchers(engine.loader.clone());

    // ========================================================================
    // Step 3: Run the fetchers and print the aggregate
    // ========================================================================
    for run in 1..=args.runs.max(1) {
        let result = engine
            .runner
            .run_fetchers_by_network_id(&args.owner, NetworkId::Solana, &fetchers)
            .await
            .context("Portfolio run failed")?;

        for report in result
            .fetcher_reports
            .iter()
            .filter(|r| r.status == FetcherStatus::Failed)
        {
            warn!("Fetcher {} failed: {}", report.id, report.error.as_deref().unwrap_or("unknown"));
        }
        info!("Run {} finished in {}ms", run, result.duration);

        let json = if args.pretty {
            serde_json::to_string_pretty(&result)
        } else {
            serde_json::to_string(&result)
        }
        .context("Failed to serialize result")?;
        println!("{}", json);
    }

    Ok(())
}
