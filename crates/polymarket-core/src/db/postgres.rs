//! PostgreSQL trade store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::TradeStore;
use crate::types::{
    NewOpportunityLog, NewTrade, OpportunityLog, OrderSide, PerformanceMetrics,
    PortfolioSnapshot, Trade, TradeStatus, TradeType, TradeUpdate,
};
use crate::{Error, Result};

const TRADE_COLUMNS: &str = r#"
    id, external_id, market_id, token_id, outcome, trade_type, side, size, price,
    status, filled_size, average_price, cost_basis, fees, realized_pnl,
    unrealized_pnl, strategy_data, expected_probability, expected_return_pct,
    stop_loss_for, stop_loss_price, risk_score, created_at, executed_at, resolved_at
"#;

const OPPORTUNITY_COLUMNS: &str = r#"
    id, opportunity_type, market_id, detected_at, expected_profit_pct,
    expected_return_annualized, confidence_score, market_data, executed,
    trade_id, rejection_reason
"#;

const SNAPSHOT_COLUMNS: &str = r#"
    date, total_value, cash_balance, positions_value, unrealized_pnl,
    daily_return_pct, total_return_pct, max_drawdown_pct, trades_today,
    winning_trades, losing_trades, created_at
"#;

/// Repository for trades, opportunity logs and portfolio snapshots.
pub struct PgTradeStore {
    pool: PgPool,
}

impl PgTradeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO trades ({TRADE_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
              $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)"
        ))
        .bind(trade.id)
        .bind(&trade.external_id)
        .bind(&trade.market_id)
        .bind(&trade.token_id)
        .bind(&trade.outcome)
        .bind(trade.trade_type.as_str())
        .bind(trade.side.as_str())
        .bind(trade.size)
        .bind(trade.price)
        .bind(trade.status.as_str())
        .bind(trade.filled_size)
        .bind(trade.average_price)
        .bind(trade.cost_basis)
        .bind(trade.fees)
        .bind(trade.realized_pnl)
        .bind(trade.unrealized_pnl)
        .bind(&trade.strategy_data)
        .bind(trade.expected_probability)
        .bind(trade.expected_return_pct)
        .bind(trade.stop_loss_for)
        .bind(trade.stop_loss_price)
        .bind(trade.risk_score)
        .bind(trade.created_at)
        .bind(trade.executed_at)
        .bind(trade.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_trades(&self, filter: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE {filter} ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trade).collect()
    }

    async fn resolved_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE status = 'resolved' AND resolved_at >= $1 ORDER BY resolved_at"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trade).collect()
    }

    /// Convert a database row to a Trade.
    fn row_to_trade(r: &PgRow) -> Result<Trade> {
        let trade_type: String = r.get("trade_type");
        let side: String = r.get("side");
        let status: String = r.get("status");

        Ok(Trade {
            id: r.get("id"),
            external_id: r.get("external_id"),
            market_id: r.get("market_id"),
            token_id: r.get("token_id"),
            outcome: r.get("outcome"),
            trade_type: trade_type.parse::<TradeType>()?,
            side: side.parse::<OrderSide>()?,
            size: r.get("size"),
            price: r.get("price"),
            status: status.parse::<TradeStatus>()?,
            filled_size: r.get("filled_size"),
            average_price: r.get("average_price"),
            cost_basis: r.get("cost_basis"),
            fees: r.get("fees"),
            realized_pnl: r.get("realized_pnl"),
            unrealized_pnl: r.get("unrealized_pnl"),
            strategy_data: r.get("strategy_data"),
            expected_probability: r.get("expected_probability"),
            expected_return_pct: r.get("expected_return_pct"),
            stop_loss_for: r.get("stop_loss_for"),
            stop_loss_price: r.get("stop_loss_price"),
            risk_score: r.get("risk_score"),
            created_at: r.get("created_at"),
            executed_at: r.get("executed_at"),
            resolved_at: r.get("resolved_at"),
        })
    }

    fn row_to_opportunity(r: &PgRow) -> Result<OpportunityLog> {
        let opportunity_type: String = r.get("opportunity_type");
        Ok(OpportunityLog {
            id: r.get("id"),
            opportunity_type: opportunity_type.parse::<TradeType>()?,
            market_id: r.get("market_id"),
            detected_at: r.get("detected_at"),
            expected_profit_pct: r.get("expected_profit_pct"),
            expected_return_annualized: r.get("expected_return_annualized"),
            confidence_score: r.get("confidence_score"),
            market_data: r.get("market_data"),
            executed: r.get("executed"),
            trade_id: r.get("trade_id"),
            rejection_reason: r.get("rejection_reason"),
        })
    }

    fn row_to_snapshot(r: &PgRow) -> PortfolioSnapshot {
        PortfolioSnapshot {
            date: r.get("date"),
            total_value: r.get("total_value"),
            cash_balance: r.get("cash_balance"),
            positions_value: r.get("positions_value"),
            unrealized_pnl: r.get("unrealized_pnl"),
            daily_return_pct: r.get("daily_return_pct"),
            total_return_pct: r.get("total_return_pct"),
            max_drawdown_pct: r.get("max_drawdown_pct"),
            trades_today: r.get::<i32, _>("trades_today").max(0) as u32,
            winning_trades: r.get::<i32, _>("winning_trades").max(0) as u32,
            losing_trades: r.get::<i32, _>("losing_trades").max(0) as u32,
            created_at: r.get("created_at"),
        }
    }

    async fn fetch_snapshot(
        &self,
        filter: &str,
        date: Option<NaiveDate>,
    ) -> Result<Option<PortfolioSnapshot>> {
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM portfolio_snapshots {filter} LIMIT 1");
        let query = sqlx::query(&sql);
        let query = match date {
            Some(date) => query.bind(date),
            None => query,
        };
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Self::row_to_snapshot(&r)))
    }
}

#[async_trait]
impl TradeStore for PgTradeStore {
    async fn create_trade(&self, new: NewTrade) -> Result<Trade> {
        let trade = Trade::from_new(new, Utc::now())?;
        self.insert_trade(&trade).await?;
        Ok(trade)
    }

    async fn update_trade_status(
        &self,
        id: Uuid,
        status: TradeStatus,
        update: TradeUpdate,
    ) -> Result<Trade> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: "trade",
            id: id.to_string(),
        })?;

        let mut trade = Self::row_to_trade(&row)?;
        trade.apply_update(status, &update, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE trades SET
                status = $2,
                external_id = $3,
                filled_size = $4,
                average_price = $5,
                fees = $6,
                realized_pnl = $7,
                unrealized_pnl = $8,
                stop_loss_price = $9,
                executed_at = $10,
                resolved_at = $11
            WHERE id = $1
            "#,
        )
        .bind(trade.id)
        .bind(trade.status.as_str())
        .bind(&trade.external_id)
        .bind(trade.filled_size)
        .bind(trade.average_price)
        .bind(trade.fees)
        .bind(trade.realized_pnl)
        .bind(trade.unrealized_pnl)
        .bind(trade.stop_loss_price)
        .bind(trade.executed_at)
        .bind(trade.resolved_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(trade)
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>> {
        let row = sqlx::query(&format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::row_to_trade(&r)).transpose()
    }

    async fn get_active_trades(&self) -> Result<Vec<Trade>> {
        self.fetch_trades("status IN ('pending', 'executed', 'filled')").await
    }

    async fn get_trades_by_market(&self, market_id: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE market_id = $1 ORDER BY created_at"
        ))
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trade).collect()
    }

    async fn find_stop_loss_for(&self, original_id: Uuid) -> Result<Option<Trade>> {
        let row = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE stop_loss_for = $1 AND status IN ('pending', 'executed', 'filled') \
             ORDER BY created_at LIMIT 1"
        ))
        .bind(original_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_trade(&r)).transpose()
    }

    async fn realized_pnl_since(&self, since: DateTime<Utc>) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(realized_pnl), 0) AS pnl
            FROM trades
            WHERE status = 'resolved' AND resolved_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("pnl"))
    }

    async fn has_realized_loss_since(&self, since: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM trades
                WHERE status = 'resolved' AND resolved_at >= $1 AND realized_pnl < 0
            ) AS has_loss
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("has_loss"))
    }

    async fn count_failed_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM trades WHERE status = 'failed' AND created_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("n").max(0) as u64)
    }

    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trades WHERE created_at >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("n").max(0) as u64)
    }

    async fn performance_since(&self, since: DateTime<Utc>) -> Result<Option<PerformanceMetrics>> {
        let trades = self.resolved_since(since).await?;
        Ok(PerformanceMetrics::from_resolved(&trades))
    }

    async fn log_opportunity(&self, new: NewOpportunityLog) -> Result<OpportunityLog> {
        let log = OpportunityLog::from_new(new, Utc::now());

        sqlx::query(&format!(
            "INSERT INTO opportunity_logs ({OPPORTUNITY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(log.id)
        .bind(log.opportunity_type.as_str())
        .bind(&log.market_id)
        .bind(log.detected_at)
        .bind(log.expected_profit_pct)
        .bind(log.expected_return_annualized)
        .bind(log.confidence_score)
        .bind(&log.market_data)
        .bind(log.executed)
        .bind(log.trade_id)
        .bind(&log.rejection_reason)
        .execute(&self.pool)
        .await?;

        Ok(log)
    }

    async fn mark_opportunity_executed(&self, id: Uuid, trade_id: Option<Uuid>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE opportunity_logs
            SET executed = TRUE, trade_id = $2, rejection_reason = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "opportunity",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_opportunity_rejected(&self, id: Uuid, reason: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE opportunity_logs
            SET executed = FALSE, trade_id = NULL, rejection_reason = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "opportunity",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_opportunity(&self, id: Uuid) -> Result<Option<OpportunityLog>> {
        let row = sqlx::query(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunity_logs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_opportunity(&r)).transpose()
    }

    async fn upsert_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO portfolio_snapshots ({SNAPSHOT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (date) DO UPDATE SET \
                total_value = EXCLUDED.total_value, \
                cash_balance = EXCLUDED.cash_balance, \
                positions_value = EXCLUDED.positions_value, \
                unrealized_pnl = EXCLUDED.unrealized_pnl, \
                daily_return_pct = EXCLUDED.daily_return_pct, \
                total_return_pct = EXCLUDED.total_return_pct, \
                max_drawdown_pct = EXCLUDED.max_drawdown_pct, \
                trades_today = EXCLUDED.trades_today, \
                winning_trades = EXCLUDED.winning_trades, \
                losing_trades = EXCLUDED.losing_trades"
        ))
        .bind(snapshot.date)
        .bind(snapshot.total_value)
        .bind(snapshot.cash_balance)
        .bind(snapshot.positions_value)
        .bind(snapshot.unrealized_pnl)
        .bind(snapshot.daily_return_pct)
        .bind(snapshot.total_return_pct)
        .bind(snapshot.max_drawdown_pct)
        .bind(snapshot.trades_today as i32)
        .bind(snapshot.winning_trades as i32)
        .bind(snapshot.losing_trades as i32)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_portfolio_snapshot(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>> {
        self.fetch_snapshot("WHERE date = $1", Some(date)).await
    }

    async fn previous_portfolio_snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<Option<PortfolioSnapshot>> {
        self.fetch_snapshot("WHERE date < $1 ORDER BY date DESC", Some(date))
            .await
    }

    async fn earliest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        self.fetch_snapshot("ORDER BY date ASC", None).await
    }
}
