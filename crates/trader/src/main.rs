//! Trader
//!
//! Runs the autonomous trading loop against live Polymarket data with a
//! paper exchange for execution.

use anyhow::{Context, Result};
use clap::Parser;
use opportunity_scanner::{
    CrossPlatformStrategy, EndgameStrategy, IntraMarketStrategy, OpportunityStrategy,
};
use polymarket_core::api::PolymarketClient;
use polymarket_core::config::Config;
use polymarket_core::db::{self, InMemoryTradeStore, PgTradeStore, TradeStore};
use polymarket_core::providers::StaticExternalMarkets;
use polymarket_core::{ExecutionProvider, ExternalMarketProvider, MarketDataProvider};
use risk_manager::RiskEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::{EngineState, PaperExchange, TradingEngine};

const DEFAULT_LOG_FILTER: &str =
    "trader=info,trading_engine=info,risk_manager=info,opportunity_scanner=info,polymarket_core=warn";

#[derive(Debug, Parser)]
#[command(name = "trader", about = "Autonomous prediction-market trading controller")]
struct Args {
    /// Submit orders to the exchange instead of recording synthetic fills.
    #[arg(long)]
    live: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    info!("Starting trader");

    let mut config = Config::load().context("failed to load configuration")?;
    if args.live {
        config.engine.dry_run = false;
    }

    let store = open_store(&config).await?;
    let market_data: Arc<dyn MarketDataProvider> = Arc::new(
        PolymarketClient::new(&config.api).context("failed to build Polymarket client")?,
    );
    let execution: Arc<dyn ExecutionProvider> =
        Arc::new(PaperExchange::new(config.paper.starting_balance));
    let external = external_markets(&config)?;

    let strategies: Vec<Arc<dyn OpportunityStrategy>> = vec![
        Arc::new(EndgameStrategy::new(
            config.endgame.clone(),
            Arc::clone(&market_data),
        )),
        Arc::new(CrossPlatformStrategy::new(
            config.cross_platform.clone(),
            Arc::clone(&market_data),
            external,
        )),
        Arc::new(IntraMarketStrategy::new(
            config.intra_market.clone(),
            Arc::clone(&market_data),
        )),
    ];

    let risk = Arc::new(RiskEngine::new(
        config.risk.clone(),
        Arc::clone(&store),
        Arc::clone(&execution),
    ));
    let engine = Arc::new(TradingEngine::new(
        config.engine.clone(),
        risk,
        store,
        market_data,
        execution,
        strategies,
    ));

    if args.once {
        engine.run_cycle().await?;
        print_status(&engine).await;
        return Ok(());
    }

    engine.start().await?;

    let poll = Duration::from_secs(config.engine.heartbeat_interval_secs);
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Interrupt received, stopping engine");
        }
        state = wait_for_halt(&engine, poll) => {
            warn!(state = %state, "Engine halted");
        }
    }

    if let Err(e) = engine.stop().await {
        error!(error = %e, "Engine did not stop cleanly");
    }
    print_status(&engine).await;

    Ok(())
}

/// `LOG_FORMAT=json` switches to structured JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// PostgreSQL when a database is configured, otherwise an in-process store.
async fn open_store(config: &Config) -> Result<Arc<dyn TradeStore>> {
    match &config.database {
        Some(database) => {
            let pool = db::create_pool(database)
                .await
                .context("failed to connect to database")?;
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;
            info!("Using PostgreSQL trade store");
            Ok(Arc::new(PgTradeStore::new(pool)))
        }
        None => {
            warn!("No database configured, trades are kept in memory only");
            Ok(Arc::new(InMemoryTradeStore::new()))
        }
    }
}

fn external_markets(config: &Config) -> Result<Arc<dyn ExternalMarketProvider>> {
    let venue = config.cross_platform.external_venue.clone();
    let provider = match &config.cross_platform.external_markets_path {
        Some(path) => StaticExternalMarkets::from_json_file(venue, path)
            .with_context(|| format!("failed to load external markets from {}", path))?,
        None => StaticExternalMarkets::new(venue, Vec::new()),
    };
    Ok(Arc::new(provider))
}

/// Resolves once the loop has left RUNNING/PAUSED for a terminal state.
async fn wait_for_halt(engine: &TradingEngine, poll: Duration) -> EngineState {
    loop {
        tokio::time::sleep(poll).await;
        let state = engine.state().await;
        if matches!(state, EngineState::EmergencyShutdown | EngineState::Error) {
            return state;
        }
    }
}

async fn print_status(engine: &TradingEngine) {
    let status = engine.get_status().await;
    match serde_json::to_string_pretty(&status) {
        Ok(json) => info!("Final engine status:\n{}", json),
        Err(e) => warn!(error = %e, "Could not serialize engine status"),
    }
}
