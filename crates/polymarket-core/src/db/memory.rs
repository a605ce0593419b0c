//! In-process trade store for dry runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::TradeStore;
use crate::types::{
    NewOpportunityLog, NewTrade, OpportunityLog, PerformanceMetrics, PortfolioSnapshot, Trade,
    TradeStatus, TradeUpdate,
};
use crate::{Error, Result};

/// Trade store backed by concurrent maps. Contents are lost on exit.
#[derive(Default)]
pub struct InMemoryTradeStore {
    trades: DashMap<Uuid, Trade>,
    opportunities: DashMap<Uuid, OpportunityLog>,
    snapshots: DashMap<NaiveDate, PortfolioSnapshot>,
}

impl InMemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed trade, bypassing creation checks.
    ///
    /// Used to seed history (e.g. trades resolved on earlier days).
    pub fn insert_trade(&self, trade: Trade) {
        self.trades.insert(trade.id, trade);
    }

    /// Every logged opportunity, oldest first.
    pub fn opportunity_logs(&self) -> Vec<OpportunityLog> {
        let mut logs: Vec<OpportunityLog> = self
            .opportunities
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        logs.sort_by_key(|log| log.detected_at);
        logs
    }

    fn collect_trades(&self, filter: impl Fn(&Trade) -> bool) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        trades.sort_by_key(|t| t.created_at);
        trades
    }

    fn resolved_since(&self, since: DateTime<Utc>) -> Vec<Trade> {
        self.collect_trades(|t| {
            t.status == TradeStatus::Resolved && t.resolved_at.is_some_and(|at| at >= since)
        })
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn create_trade(&self, new: NewTrade) -> Result<Trade> {
        let trade = Trade::from_new(new, Utc::now())?;
        self.trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn update_trade_status(
        &self,
        id: Uuid,
        status: TradeStatus,
        update: TradeUpdate,
    ) -> Result<Trade> {
        let mut entry = self.trades.get_mut(&id).ok_or_else(|| Error::NotFound {
            entity: "trade",
            id: id.to_string(),
        })?;

        // Validate on a copy so a rejected update leaves the record untouched.
        let mut trade = entry.value().clone();
        trade.apply_update(status, &update, Utc::now())?;
        *entry = trade.clone();
        Ok(trade)
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>> {
        Ok(self.trades.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_active_trades(&self) -> Result<Vec<Trade>> {
        Ok(self.collect_trades(|t| t.status.is_active()))
    }

    async fn get_trades_by_market(&self, market_id: &str) -> Result<Vec<Trade>> {
        Ok(self.collect_trades(|t| t.market_id == market_id))
    }

    async fn find_stop_loss_for(&self, original_id: Uuid) -> Result<Option<Trade>> {
        Ok(self
            .collect_trades(|t| t.stop_loss_for == Some(original_id) && t.status.is_active())
            .into_iter()
            .next())
    }

    async fn realized_pnl_since(&self, since: DateTime<Utc>) -> Result<Decimal> {
        Ok(self
            .resolved_since(since)
            .iter()
            .map(|t| t.realized_pnl.unwrap_or_default())
            .sum())
    }

    async fn has_realized_loss_since(&self, since: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .resolved_since(since)
            .iter()
            .any(|t| t.realized_pnl.is_some_and(|pnl| pnl < Decimal::ZERO)))
    }

    async fn count_failed_since(&self, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .collect_trades(|t| t.status == TradeStatus::Failed && t.created_at >= since)
            .len() as u64)
    }

    async fn count_trades_since(&self, since: DateTime<Utc>) -> Result<u64> {
        Ok(self.collect_trades(|t| t.created_at >= since).len() as u64)
    }

    async fn performance_since(&self, since: DateTime<Utc>) -> Result<Option<PerformanceMetrics>> {
        Ok(PerformanceMetrics::from_resolved(&self.resolved_since(since)))
    }

    async fn log_opportunity(&self, new: NewOpportunityLog) -> Result<OpportunityLog> {
        let log = OpportunityLog::from_new(new, Utc::now());
        self.opportunities.insert(log.id, log.clone());
        Ok(log)
    }

    async fn mark_opportunity_executed(&self, id: Uuid, trade_id: Option<Uuid>) -> Result<()> {
        let mut entry = self.opportunities.get_mut(&id).ok_or_else(|| Error::NotFound {
            entity: "opportunity",
            id: id.to_string(),
        })?;
        entry.executed = true;
        entry.trade_id = trade_id;
        entry.rejection_reason = None;
        Ok(())
    }

    async fn mark_opportunity_rejected(&self, id: Uuid, reason: &str) -> Result<()> {
        let mut entry = self.opportunities.get_mut(&id).ok_or_else(|| Error::NotFound {
            entity: "opportunity",
            id: id.to_string(),
        })?;
        entry.executed = false;
        entry.trade_id = None;
        entry.rejection_reason = Some(reason.to_string());
        Ok(())
    }

    async fn get_opportunity(&self, id: Uuid) -> Result<Option<OpportunityLog>> {
        Ok(self.opportunities.get(&id).map(|entry| entry.value().clone()))
    }

    async fn upsert_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        self.snapshots.insert(snapshot.date, snapshot.clone());
        Ok(())
    }

    async fn get_portfolio_snapshot(&self, date: NaiveDate) -> Result<Option<PortfolioSnapshot>> {
        Ok(self.snapshots.get(&date).map(|entry| entry.value().clone()))
    }

    async fn previous_portfolio_snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<Option<PortfolioSnapshot>> {
        Ok(self
            .snapshots
            .iter()
            .filter(|entry| *entry.key() < date)
            .max_by_key(|entry| *entry.key())
            .map(|entry| entry.value().clone()))
    }

    async fn earliest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        Ok(self
            .snapshots
            .iter()
            .min_by_key(|entry| *entry.key())
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, TradeType};
    use chrono::Duration;

    fn new_trade(market: &str) -> NewTrade {
        NewTrade {
            market_id: market.to_string(),
            token_id: "yes".to_string(),
            outcome: "Yes".to_string(),
            trade_type: TradeType::Endgame,
            side: OrderSide::Buy,
            size: Decimal::new(10, 0),
            price: Decimal::new(20, 2),
            status: TradeStatus::Pending,
            external_id: None,
            strategy_data: serde_json::Value::Null,
            expected_probability: None,
            expected_return_pct: None,
            stop_loss_for: None,
            risk_score: None,
        }
    }

    fn resolve(pnl: i64) -> TradeUpdate {
        TradeUpdate {
            realized_pnl: Some(Decimal::new(pnl, 0)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_update_trade() {
        let store = InMemoryTradeStore::new();
        let trade = store.create_trade(new_trade("m1")).await.unwrap();
        assert_eq!(trade.cost_basis, Decimal::new(2, 0));

        let updated = store
            .update_trade_status(
                trade.id,
                TradeStatus::Executed,
                TradeUpdate {
                    external_id: Some("order-1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.external_id.as_deref(), Some("order-1"));
        assert_eq!(store.get_active_trades().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_record_untouched() {
        let store = InMemoryTradeStore::new();
        let trade = store.create_trade(new_trade("m1")).await.unwrap();
        store
            .update_trade_status(trade.id, TradeStatus::Resolved, resolve(8))
            .await
            .unwrap();

        let result = store
            .update_trade_status(trade.id, TradeStatus::Filled, TradeUpdate::default())
            .await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));

        let stored = store.get_trade(trade.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Resolved);
        assert!(store.get_active_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_trade_is_not_found() {
        let store = InMemoryTradeStore::new();
        let result = store
            .update_trade_status(Uuid::new_v4(), TradeStatus::Failed, TradeUpdate::default())
            .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_realized_pnl_window_uses_resolution_time() {
        let store = InMemoryTradeStore::new();
        let win = store.create_trade(new_trade("m1")).await.unwrap();
        let loss = store.create_trade(new_trade("m2")).await.unwrap();
        store
            .update_trade_status(win.id, TradeStatus::Resolved, resolve(8))
            .await
            .unwrap();
        store
            .update_trade_status(loss.id, TradeStatus::Resolved, resolve(-2))
            .await
            .unwrap();

        let mut old = Trade::from_new(new_trade("m3"), Utc::now() - Duration::days(3)).unwrap();
        old.status = TradeStatus::Resolved;
        old.realized_pnl = Some(Decimal::new(-50, 0));
        old.resolved_at = Some(Utc::now() - Duration::days(3));
        store.insert_trade(old);

        let since = Utc::now() - Duration::hours(1);
        assert_eq!(
            store.realized_pnl_since(since).await.unwrap(),
            Decimal::new(6, 0)
        );
        assert!(store.has_realized_loss_since(since).await.unwrap());

        let week = Utc::now() - Duration::days(7);
        assert_eq!(
            store.realized_pnl_since(week).await.unwrap(),
            Decimal::new(-44, 0)
        );

        let metrics = store.get_performance_metrics(30).await.unwrap().unwrap();
        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 1);
    }

    #[tokio::test]
    async fn test_live_stop_loss_lookup() {
        let store = InMemoryTradeStore::new();
        let original = store.create_trade(new_trade("m1")).await.unwrap();
        assert!(store.find_stop_loss_for(original.id).await.unwrap().is_none());

        let stop = store
            .create_trade(NewTrade {
                side: OrderSide::Sell,
                stop_loss_for: Some(original.id),
                ..new_trade("m1")
            })
            .await
            .unwrap();
        assert_eq!(
            store.find_stop_loss_for(original.id).await.unwrap().map(|t| t.id),
            Some(stop.id)
        );

        store
            .update_trade_status(stop.id, TradeStatus::Failed, TradeUpdate::default())
            .await
            .unwrap();
        assert!(store.find_stop_loss_for(original.id).await.unwrap().is_none());
        assert_eq!(
            store
                .count_failed_since(Utc::now() - Duration::hours(1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_opportunity_log_linkage() {
        let store = InMemoryTradeStore::new();
        let new = NewOpportunityLog {
            opportunity_type: TradeType::IntraMarket,
            market_id: "m1".to_string(),
            expected_profit_pct: Decimal::new(526, 2),
            expected_return_annualized: None,
            confidence_score: Some(Decimal::new(80, 0)),
            market_data: serde_json::json!({"price_sum": "0.95"}),
        };

        let executed = store.log_opportunity(new.clone()).await.unwrap();
        let trade_id = Uuid::new_v4();
        store
            .mark_opportunity_executed(executed.id, Some(trade_id))
            .await
            .unwrap();
        let stored = store.get_opportunity(executed.id).await.unwrap().unwrap();
        assert!(stored.executed);
        assert_eq!(stored.trade_id, Some(trade_id));

        let rejected = store.log_opportunity(new).await.unwrap();
        store
            .mark_opportunity_rejected(rejected.id, "daily loss limit reached")
            .await
            .unwrap();
        let stored = store.get_opportunity(rejected.id).await.unwrap().unwrap();
        assert!(!stored.executed);
        assert_eq!(stored.trade_id, None);
        assert_eq!(
            stored.rejection_reason.as_deref(),
            Some("daily loss limit reached")
        );
    }

    #[tokio::test]
    async fn test_snapshot_upsert_is_keyed_by_date() {
        let store = InMemoryTradeStore::new();
        let today = Utc::now().date_naive();
        let snapshot = |date: NaiveDate, value: i64| PortfolioSnapshot {
            date,
            total_value: Decimal::new(value, 0),
            cash_balance: Decimal::new(value, 0),
            positions_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            daily_return_pct: None,
            total_return_pct: None,
            max_drawdown_pct: None,
            trades_today: 0,
            winning_trades: 0,
            losing_trades: 0,
            created_at: Utc::now(),
        };

        store
            .upsert_portfolio_snapshot(&snapshot(today - Duration::days(2), 900))
            .await
            .unwrap();
        store.upsert_portfolio_snapshot(&snapshot(today, 1000)).await.unwrap();
        store.upsert_portfolio_snapshot(&snapshot(today, 1010)).await.unwrap();

        let stored = store.get_portfolio_snapshot(today).await.unwrap().unwrap();
        assert_eq!(stored.total_value, Decimal::new(1010, 0));
        assert_eq!(
            store
                .previous_portfolio_snapshot(today)
                .await
                .unwrap()
                .unwrap()
                .total_value,
            Decimal::new(900, 0)
        );
        assert_eq!(
            store
                .earliest_portfolio_snapshot()
                .await
                .unwrap()
                .unwrap()
                .date,
            today - Duration::days(2)
        );
    }
}
