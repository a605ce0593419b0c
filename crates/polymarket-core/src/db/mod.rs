//! Trade repository contract with PostgreSQL and in-memory backends.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTradeStore;
pub use postgres::PgTradeStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::types::{
    NewOpportunityLog, NewTrade, OpportunityLog, PerformanceMetrics, PortfolioSnapshot, Trade,
    TradeStatus, TradeUpdate,
};
use crate::Result;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Run database migrations from the migrations directory.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(Path::new("./migrations")).await?;
    migrator.run(pool).await?;
    Ok(())
}

/// Durable store for trades, opportunity logs and portfolio snapshots.
///
/// Each call is one short statement or transaction.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn create_trade(&self, new: NewTrade) -> Result<Trade>;

    /// Move a trade to `status` and apply field updates.
    ///
    /// Backward transitions and fills above the requested size are rejected
    /// without touching the stored record.
    async fn update_trade_status(
        &self,
        id: Uuid,
        status: TradeStatus,
        update: TradeUpdate,
    ) -> Result<Trade>;

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>>;

    /// Trades in PENDING, EXECUTED or FILLED, oldest first.
    async fn get_active_trades(&self) -> Result<Vec<Trade>>;

    async fn get_trades_by_market(&self, market_id: &str) -> Result<Vec<Trade>>;

    /// The live (non-terminal) stop-loss trade closing out `original_id`, if any.
    async fn find_stop_loss_for(&self, original_id: Uuid) -> Result<Option<Trade>>;

    /// Sum of realized P&L over trades resolved at or after `since`.
    async fn realized_pnl_since(&self, since: DateTime<Utc>) -> Result<Decimal>;

    /// Whether any trade resolved at or after `since` lost money.
    async fn has_realized_loss_since(&self, since: DateTime<Utc>) -> Result<bool>;

    /// FAILED trades created at or after `since`.
    async fn count_failed_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Trades created at or after `since`, any status.
    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Metrics over trades resolved at or after `since`; `None` when there are none.
    async fn performance_since(&self, since: DateTime<Utc>) -> Result<Option<PerformanceMetrics>>;

    /// Metrics over the last `days` days.
    async fn get_performance_metrics(&self, days: i64) -> Result<Option<PerformanceMetrics>> {
        self.performance_since(Utc::now() - Duration::days(days)).await
    }

    async fn log_opportunity(&self, new: NewOpportunityLog) -> Result<OpportunityLog>;

    /// Mark a logged candidate as executed, linking the resulting trade.
    async fn mark_opportunity_executed(&self, id: Uuid, trade_id: Option<Uuid>) -> Result<()>;

    /// Record why a logged candidate was not executed.
    async fn mark_opportunity_rejected(&self, id: Uuid, reason: &str) -> Result<()>;

    async fn get_opportunity(&self, id: Uuid) -> Result<Option<OpportunityLog>>;

    /// Insert or replace the snapshot for `snapshot.date`.
    async fn upsert_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()>;

    async fn get_portfolio_snapshot(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>>;

    /// Most recent snapshot dated strictly before `date`.
    async fn previous_portfolio_snapshot(&self, date: NaiveDate)
        -> Result<Option<PortfolioSnapshot>>;

    async fn earliest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>>;
}
