//! Trade approval, stop-loss checks and sticky emergency shutdown.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use polymarket_core::config::RiskConfig;
use polymarket_core::db::TradeStore;
use polymarket_core::types::{Trade, TradeStatus, TradeType};
use polymarket_core::ExecutionProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::assessment::{AssessmentBuilder, RiskAssessment, RiskLevel, TradeRiskRequest};
use crate::error::{Result, RiskError};
use crate::exposure::ExposureTracker;
use crate::limits::TradingLimits;

/// Why trading was halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    DailyLoss,
    WeeklyLoss,
    RepeatedFailures,
    Manual,
}

/// A latched emergency shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRecord {
    pub reason: ShutdownReason,
    pub detail: String,
    pub triggered_at: DateTime<Utc>,
}

/// Point-in-time risk figures for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub portfolio_value: Decimal,
    pub cash_balance: Decimal,
    pub daily_pnl: Decimal,
    pub weekly_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    pub weekly_pnl_pct: Decimal,
    pub active_trades: usize,
    pub total_exposure: Decimal,
    pub exposure_pct: Decimal,
    pub emergency_shutdown: bool,
    pub shutdown_reason: Option<ShutdownReason>,
    pub cooling_period: bool,
    pub win_rate: Option<Decimal>,
    pub profit_factor: Option<Decimal>,
    /// Position-size percentage after dynamic scaling.
    pub position_size_pct: Decimal,
}

/// Portfolio state gathered once per decision.
struct PortfolioState {
    cash_balance: Decimal,
    portfolio_value: Decimal,
    active_trades: Vec<Trade>,
    exposure: ExposureTracker,
}

/// UTC midnight of the day containing `now`.
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Loss as a share of portfolio value; zero when P&L is not negative.
fn loss_pct(pnl: Decimal, portfolio_value: Decimal) -> Decimal {
    if pnl >= Decimal::ZERO || portfolio_value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    pnl.abs() / portfolio_value
}

fn pct(value: Decimal) -> Decimal {
    (value * Decimal::ONE_HUNDRED).round_dp(1)
}

/// Risk engine shared by the trading loop.
pub struct RiskEngine {
    config: Arc<RwLock<RiskConfig>>,
    store: Arc<dyn TradeStore>,
    execution: Arc<dyn ExecutionProvider>,
    /// Fast path flag for the sticky shutdown.
    shutdown_triggered: AtomicBool,
    shutdown: RwLock<Option<ShutdownRecord>>,
}

impl RiskEngine {
    pub fn new(
        config: RiskConfig,
        store: Arc<dyn TradeStore>,
        execution: Arc<dyn ExecutionProvider>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            execution,
            shutdown_triggered: AtomicBool::new(false),
            shutdown: RwLock::new(None),
        }
    }

    /// Assess a proposed trade.
    ///
    /// Never errors: any failure while gathering inputs yields an unapproved
    /// CRITICAL assessment carrying the error as its reason.
    pub async fn assess_trade_risk(&self, request: &TradeRiskRequest) -> RiskAssessment {
        let assessment = match self.try_assess(request).await {
            Ok(assessment) => assessment,
            Err(e) => {
                error!(market_id = %request.market_id, error = %e, "Risk assessment failed");
                RiskAssessment::fail_closed(format!("Risk assessment error: {}", e))
            }
        };

        info!(
            market_id = %request.market_id,
            token_id = %request.token_id,
            trade_type = %request.trade_type,
            requested_size = %request.size,
            price = %request.price,
            probability = %request.probability,
            risk_level = %assessment.risk_level,
            approved = assessment.approved,
            max_position_size = %assessment.max_position_size,
            reasons = %assessment.reasons.join("; "),
            warnings = %assessment.warnings.join("; "),
            "Risk assessment"
        );

        assessment
    }

    async fn try_assess(&self, request: &TradeRiskRequest) -> Result<RiskAssessment> {
        if request.size <= Decimal::ZERO {
            return Err(RiskError::InvalidInput(format!(
                "size must be positive, got {}",
                request.size
            )));
        }
        if request.price <= Decimal::ZERO {
            return Err(RiskError::InvalidInput(format!(
                "price must be positive, got {}",
                request.price
            )));
        }
        if request.probability < Decimal::ZERO || request.probability > Decimal::ONE {
            return Err(RiskError::InvalidInput(format!(
                "probability must be in [0, 1], got {}",
                request.probability
            )));
        }

        let config = self.config.read().await.clone();
        let now = Utc::now();

        let portfolio = self.portfolio_state().await?;
        if portfolio.portfolio_value <= Decimal::ZERO {
            return Err(RiskError::NoPortfolioValue(portfolio.portfolio_value));
        }
        let portfolio_value = portfolio.portfolio_value;

        let performance = self
            .store
            .performance_since(now - Duration::days(config.performance_window_days))
            .await?;
        let limits = TradingLimits::from(&config).dynamic(performance.as_ref());

        let mut checks = AssessmentBuilder::new();

        // 1. Position value
        let trade_value = request.size * request.price;
        let max_position_value = portfolio_value * limits.max_position_pct;
        if trade_value > max_position_value {
            checks.block(
                RiskLevel::High,
                format!(
                    "Trade value ${:.2} exceeds max position value ${:.2}",
                    trade_value, max_position_value
                ),
            );
        }

        // 2. Per-market exposure after this trade
        let market_exposure = portfolio
            .exposure
            .market_exposure_pct(&request.market_id, portfolio_value)
            + trade_value / portfolio_value;
        if market_exposure > config.max_exposure_per_market {
            checks.block(
                RiskLevel::High,
                format!(
                    "Market exposure {}% exceeds limit {}%",
                    pct(market_exposure),
                    pct(config.max_exposure_per_market)
                ),
            );
        }

        // 3. Daily realized loss
        let daily_pnl = self.store.realized_pnl_since(start_of_day(now)).await?;
        let daily_loss = loss_pct(daily_pnl, portfolio_value);
        if daily_pnl < Decimal::ZERO && daily_loss >= limits.daily_loss_limit_pct {
            checks.block(
                RiskLevel::Critical,
                format!("Daily loss limit reached: {}%", pct(daily_loss)),
            );
        }

        // 4. Weekly realized loss
        let weekly_pnl = self.store.realized_pnl_since(now - Duration::days(7)).await?;
        let weekly_loss = loss_pct(weekly_pnl, portfolio_value);
        if weekly_pnl < Decimal::ZERO && weekly_loss >= limits.weekly_loss_limit_pct {
            checks.block(
                RiskLevel::Critical,
                format!("Weekly loss limit reached: {}%", pct(weekly_loss)),
            );
        }

        // 5. Probability floor
        if request.probability < config.min_probability {
            checks.warn(
                RiskLevel::Medium,
                format!(
                    "Probability {}% below minimum {}%",
                    pct(request.probability),
                    pct(config.min_probability)
                ),
            );
        }

        // 6. Liquidity floor
        if request.market.volume_24h < config.min_volume_24h {
            checks.warn(
                RiskLevel::Medium,
                format!("Low market liquidity: ${:.0}", request.market.volume_24h),
            );
        }

        // 7. Imminent resolution
        if request
            .market
            .hours_to_resolution
            .is_some_and(|hours| hours < Decimal::ONE)
        {
            checks.warn(
                RiskLevel::Medium,
                "Market resolves very soon (<1 hour)".to_string(),
            );
        }

        // 8. Concurrent trades
        if portfolio.active_trades.len() >= config.max_concurrent_trades {
            checks.block(
                RiskLevel::High,
                format!(
                    "Max concurrent trades limit reached: {}",
                    portfolio.active_trades.len()
                ),
            );
        }

        // 9. Cooling period after a realized loss
        if self.in_cooling_period(&config, now).await? {
            checks.block(
                RiskLevel::High,
                "In cooling period after recent loss".to_string(),
            );
        }

        // 10. Black swan
        if request.trade_type == TradeType::Endgame
            && request.probability > config.black_swan_probability
        {
            checks.warn(
                RiskLevel::Low,
                "Extreme high probability - black swan risk".to_string(),
            );
        }

        let cap = max_position_value / request.price;
        Ok(checks.finish(request.size, cap))
    }

    /// Whether a filled position should be closed out.
    ///
    /// Triggers when the live probability falls below the stop-loss threshold
    /// or the unrealized loss exceeds the configured share of cost basis.
    pub async fn should_stop_loss(&self, trade: &Trade, current_probability: Decimal) -> bool {
        if trade.status != TradeStatus::Filled {
            return false;
        }
        let config = self.config.read().await;

        if current_probability < config.stop_loss_threshold {
            warn!(
                trade_id = %trade.id,
                probability = %current_probability,
                threshold = %config.stop_loss_threshold,
                "Stop-loss triggered by probability"
            );
            return true;
        }

        let loss_limit = -(trade.cost_basis * config.max_unrealized_loss_pct);
        if trade.unrealized_pnl.is_some_and(|pnl| pnl < loss_limit) {
            warn!(
                trade_id = %trade.id,
                unrealized_pnl = ?trade.unrealized_pnl,
                cost_basis = %trade.cost_basis,
                "Stop-loss triggered by unrealized loss"
            );
            return true;
        }

        false
    }

    /// Fast path for the latched shutdown flag.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_triggered.load(Ordering::SeqCst)
    }

    /// Check whether trading must halt.
    ///
    /// Once a trigger fires the result stays `true` until [`reset_shutdown`].
    /// A failure while checking returns `true` without latching.
    ///
    /// [`reset_shutdown`]: RiskEngine::reset_shutdown
    pub async fn check_emergency_shutdown(&self) -> bool {
        if self.is_shutdown() {
            return true;
        }

        match self.evaluate_emergency().await {
            Ok(Some((reason, detail))) => {
                self.latch(reason, detail).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(error = %e, "Emergency shutdown check failed, failing closed");
                true
            }
        }
    }

    async fn evaluate_emergency(&self) -> Result<Option<(ShutdownReason, String)>> {
        let config = self.config.read().await.clone();
        let now = Utc::now();
        let portfolio_value = self.portfolio_state().await?.portfolio_value;

        if portfolio_value > Decimal::ZERO {
            let daily_pnl = self.store.realized_pnl_since(start_of_day(now)).await?;
            let daily_loss = loss_pct(daily_pnl, portfolio_value);
            let daily_limit = config.max_daily_loss_pct * config.daily_emergency_multiplier;
            if daily_pnl < Decimal::ZERO && daily_loss >= daily_limit {
                return Ok(Some((
                    ShutdownReason::DailyLoss,
                    format!(
                        "Daily loss {}% exceeds emergency threshold {}%",
                        pct(daily_loss),
                        pct(daily_limit)
                    ),
                )));
            }

            let weekly_pnl = self.store.realized_pnl_since(now - Duration::days(7)).await?;
            let weekly_loss = loss_pct(weekly_pnl, portfolio_value);
            let weekly_limit = config.max_weekly_loss_pct * config.weekly_emergency_multiplier;
            if weekly_pnl < Decimal::ZERO && weekly_loss >= weekly_limit {
                return Ok(Some((
                    ShutdownReason::WeeklyLoss,
                    format!(
                        "Weekly loss {}% exceeds emergency threshold {}%",
                        pct(weekly_loss),
                        pct(weekly_limit)
                    ),
                )));
            }
        }

        let failures = self
            .store
            .count_failed_since(now - Duration::minutes(config.failure_window_minutes))
            .await?;
        if failures >= config.max_recent_failures {
            return Ok(Some((
                ShutdownReason::RepeatedFailures,
                format!("Too many recent failures ({})", failures),
            )));
        }

        Ok(None)
    }

    /// Latch the shutdown manually.
    pub async fn trigger_shutdown(&self, detail: impl Into<String>) {
        self.latch(ShutdownReason::Manual, detail.into()).await;
    }

    async fn latch(&self, reason: ShutdownReason, detail: String) {
        let mut shutdown = self.shutdown.write().await;
        if shutdown.is_none() {
            error!(
                critical = true,
                reason = ?reason,
                detail = %detail,
                "EMERGENCY SHUTDOWN triggered"
            );
            *shutdown = Some(ShutdownRecord {
                reason,
                detail,
                triggered_at: Utc::now(),
            });
        }
        self.shutdown_triggered.store(true, Ordering::SeqCst);
    }

    /// Clear the sticky shutdown. Operator action only.
    pub async fn reset_shutdown(&self) {
        let mut shutdown = self.shutdown.write().await;
        *shutdown = None;
        self.shutdown_triggered.store(false, Ordering::SeqCst);
        info!("Emergency shutdown reset by operator");
    }

    pub async fn shutdown_record(&self) -> Option<ShutdownRecord> {
        self.shutdown.read().await.clone()
    }

    /// Current risk figures for monitoring.
    pub async fn get_risk_metrics(&self) -> Result<RiskMetrics> {
        let config = self.config.read().await.clone();
        let now = Utc::now();
        let portfolio = self.portfolio_state().await?;
        let daily_pnl = self.store.realized_pnl_since(start_of_day(now)).await?;
        let weekly_pnl = self.store.realized_pnl_since(now - Duration::days(7)).await?;
        let performance = self
            .store
            .performance_since(now - Duration::days(config.performance_window_days))
            .await?;
        let limits = TradingLimits::from(&config).dynamic(performance.as_ref());
        let cooling_period = self.in_cooling_period(&config, now).await?;

        let share = |value: Decimal| {
            if portfolio.portfolio_value > Decimal::ZERO {
                value / portfolio.portfolio_value
            } else {
                Decimal::ZERO
            }
        };

        Ok(RiskMetrics {
            portfolio_value: portfolio.portfolio_value,
            cash_balance: portfolio.cash_balance,
            daily_pnl,
            weekly_pnl,
            daily_pnl_pct: share(daily_pnl),
            weekly_pnl_pct: share(weekly_pnl),
            active_trades: portfolio.active_trades.len(),
            total_exposure: portfolio.exposure.total_exposure(),
            exposure_pct: share(portfolio.exposure.total_exposure()),
            emergency_shutdown: self.is_shutdown(),
            shutdown_reason: self.shutdown.read().await.as_ref().map(|s| s.reason),
            cooling_period,
            win_rate: performance.as_ref().map(|p| p.win_rate),
            profit_factor: performance.as_ref().and_then(|p| p.profit_factor),
            position_size_pct: limits.max_position_pct,
        })
    }

    pub async fn config(&self) -> RiskConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: RiskConfig) {
        let mut current = self.config.write().await;
        *current = config;
        info!("Risk config updated");
    }

    /// Cash plus capital committed to open trades.
    ///
    /// Dry-run fills leave exchange cash untouched, so their cost is taken
    /// out of cash to keep the portfolio value from growing with each one.
    async fn portfolio_state(&self) -> Result<PortfolioState> {
        let exchange_cash = self.execution.get_cash_balance().await?;
        let active_trades = self.store.get_active_trades().await?;
        let exposure = ExposureTracker::from_trades(&active_trades);
        let cash_balance = exposure.available_cash(exchange_cash);
        Ok(PortfolioState {
            cash_balance,
            portfolio_value: cash_balance + exposure.total_exposure(),
            active_trades,
            exposure,
        })
    }

    async fn in_cooling_period(&self, config: &RiskConfig, now: DateTime<Utc>) -> Result<bool> {
        let since = now - Duration::hours(config.cooling_period_hours);
        Ok(self.store.has_realized_loss_since(since).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::MarketContext;
    use async_trait::async_trait;
    use mockall::mock;
    use polymarket_core::db::InMemoryTradeStore;
    use polymarket_core::providers::HealthStatus;
    use polymarket_core::types::{
        NewTrade, OrderRequest, OrderSide, OrderStatusReport, TokenBalance, TradeUpdate,
    };

    mock! {
        pub Exchange {}

        #[async_trait]
        impl ExecutionProvider for Exchange {
            async fn place_order(&self, order: &OrderRequest) -> polymarket_core::Result<Option<String>>;
            async fn cancel_order(&self, order_id: &str) -> polymarket_core::Result<bool>;
            async fn get_order_status(&self, order_id: &str) -> polymarket_core::Result<Option<OrderStatusReport>>;
            async fn get_balances(&self) -> polymarket_core::Result<Vec<TokenBalance>>;
            async fn get_cash_balance(&self) -> polymarket_core::Result<Decimal>;
            async fn health_check(&self) -> polymarket_core::Result<HealthStatus>;
        }
    }

    fn exchange_with_cash(cash: i64) -> Arc<dyn ExecutionProvider> {
        let mut exchange = MockExchange::new();
        exchange
            .expect_get_cash_balance()
            .returning(move || Ok(Decimal::new(cash, 0)));
        Arc::new(exchange)
    }

    fn engine(store: Arc<InMemoryTradeStore>, cash: i64) -> RiskEngine {
        RiskEngine::new(RiskConfig::default(), store, exchange_with_cash(cash))
    }

    fn request(size: i64, price_cents: i64) -> TradeRiskRequest {
        TradeRiskRequest {
            market_id: "m1".to_string(),
            token_id: "yes".to_string(),
            trade_type: TradeType::Endgame,
            size: Decimal::new(size, 0),
            price: Decimal::new(price_cents, 2),
            probability: Decimal::new(96, 2),
            market: MarketContext {
                volume_24h: Decimal::new(5000, 0),
                hours_to_resolution: Some(Decimal::new(24, 0)),
            },
        }
    }

    fn new_trade(market: &str) -> NewTrade {
        NewTrade {
            market_id: market.to_string(),
            token_id: "yes".to_string(),
            outcome: "Yes".to_string(),
            trade_type: TradeType::Endgame,
            side: OrderSide::Buy,
            size: Decimal::new(10, 0),
            price: Decimal::new(50, 2),
            status: TradeStatus::Executed,
            external_id: Some("order".to_string()),
            strategy_data: serde_json::Value::Null,
            expected_probability: None,
            expected_return_pct: None,
            stop_loss_for: None,
            risk_score: None,
        }
    }

    async fn resolve_with_pnl(store: &InMemoryTradeStore, market: &str, pnl: i64) {
        let trade = store.create_trade(new_trade(market)).await.unwrap();
        store
            .update_trade_status(
                trade.id,
                TradeStatus::Resolved,
                TradeUpdate {
                    realized_pnl: Some(Decimal::new(pnl, 0)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_small_trade_is_approved() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store, 1000);

        // No history: 10% * 0.5 = 5% of $1000 = $50 cap.
        let assessment = risk.assess_trade_risk(&request(40, 96)).await;
        assert!(assessment.approved, "{:?}", assessment.reasons);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.max_position_size, Decimal::new(40, 0));
    }

    #[tokio::test]
    async fn test_oversized_trade_is_rejected() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store, 1000);

        let assessment = risk.assess_trade_risk(&request(100, 96)).await;
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert!(assessment.reasons[0].contains("exceeds max position value"));
    }

    #[tokio::test]
    async fn test_daily_loss_blocks_regardless_of_inputs() {
        let store = Arc::new(InMemoryTradeStore::new());
        // $60 lost today on a ~$1000 portfolio: above the 5% limit.
        resolve_with_pnl(&store, "old", -60).await;
        let risk = engine(store, 1000);

        let assessment = risk.assess_trade_risk(&request(1, 96)).await;
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert!(assessment
            .reasons
            .iter()
            .any(|r| r.starts_with("Daily loss limit reached")));
        assert_eq!(assessment.max_position_size, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cooling_period_after_loss() {
        let store = Arc::new(InMemoryTradeStore::new());
        resolve_with_pnl(&store, "old", -1).await;
        let risk = engine(store, 1000);

        let assessment = risk.assess_trade_risk(&request(1, 96)).await;
        assert!(!assessment.approved);
        assert!(assessment
            .reasons
            .contains(&"In cooling period after recent loss".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_trade_cap() {
        let store = Arc::new(InMemoryTradeStore::new());
        for market in ["a", "b", "c"] {
            store.create_trade(new_trade(market)).await.unwrap();
        }
        let risk = engine(store, 1000);

        let assessment = risk.assess_trade_risk(&request(1, 96)).await;
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_warnings_scale_size() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store, 1000);

        let mut low_volume = request(10, 96);
        low_volume.market.volume_24h = Decimal::new(50, 0);
        let assessment = risk.assess_trade_risk(&low_volume).await;
        assert!(assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert_eq!(assessment.max_position_size, Decimal::new(8, 0));
    }

    #[tokio::test]
    async fn test_black_swan_is_warning_only() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store, 1000);

        let mut near_certain = request(10, 99);
        near_certain.probability = Decimal::new(99, 2);
        let assessment = risk.assess_trade_risk(&near_certain).await;
        assert!(assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_portfolio_fails_closed() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store, 0);

        let assessment = risk.assess_trade_risk(&request(1, 96)).await;
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert!(assessment.reasons[0].starts_with("Risk assessment error"));
    }

    #[tokio::test]
    async fn test_provider_error_fails_closed() {
        let mut exchange = MockExchange::new();
        exchange.expect_get_cash_balance().returning(|| {
            Err(polymarket_core::Error::Api {
                message: "timeout".to_string(),
                status: None,
            })
        });
        let risk = RiskEngine::new(
            RiskConfig::default(),
            Arc::new(InMemoryTradeStore::new()),
            Arc::new(exchange),
        );

        let assessment = risk.assess_trade_risk(&request(1, 96)).await;
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);

        // Check errors fail closed but do not latch.
        assert!(risk.check_emergency_shutdown().await);
        assert!(!risk.is_shutdown());
    }

    #[tokio::test]
    async fn test_invalid_probability_fails_closed() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store, 1000);

        let mut bad = request(1, 96);
        bad.probability = Decimal::new(15, 1);
        assert!(!risk.assess_trade_risk(&bad).await.approved);
    }

    #[tokio::test]
    async fn test_stop_loss_on_unrealized_loss() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store.clone(), 1000);

        let mut trade = store.create_trade(new_trade("m1")).await.unwrap();
        assert_eq!(trade.cost_basis, Decimal::new(5, 0));
        trade.status = TradeStatus::Filled;
        trade.cost_basis = Decimal::new(10, 0);
        trade.unrealized_pnl = Some(Decimal::new(-6, 0));

        assert!(risk.should_stop_loss(&trade, Decimal::new(95, 2)).await);

        trade.unrealized_pnl = Some(Decimal::new(-4, 0));
        assert!(!risk.should_stop_loss(&trade, Decimal::new(95, 2)).await);
        assert!(risk.should_stop_loss(&trade, Decimal::new(80, 2)).await);

        trade.status = TradeStatus::Executed;
        assert!(!risk.should_stop_loss(&trade, Decimal::new(10, 2)).await);
    }

    #[tokio::test]
    async fn test_emergency_shutdown_is_sticky() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store.clone(), 1000);
        assert!(!risk.check_emergency_shutdown().await);

        // 11% daily loss is past the 2 x 5% emergency threshold.
        resolve_with_pnl(&store, "m1", -110).await;
        assert!(risk.check_emergency_shutdown().await);
        assert_eq!(
            risk.shutdown_record().await.map(|s| s.reason),
            Some(ShutdownReason::DailyLoss)
        );

        for _ in 0..3 {
            assert!(risk.check_emergency_shutdown().await);
        }

        risk.reset_shutdown().await;
        assert!(!risk.is_shutdown());
        assert!(risk.shutdown_record().await.is_none());
    }

    #[tokio::test]
    async fn test_repeated_failures_trigger_shutdown() {
        let store = Arc::new(InMemoryTradeStore::new());
        for _ in 0..5 {
            let trade = store.create_trade(new_trade("m1")).await.unwrap();
            store
                .update_trade_status(trade.id, TradeStatus::Failed, TradeUpdate::default())
                .await
                .unwrap();
        }
        let risk = engine(store, 1000);

        assert!(risk.check_emergency_shutdown().await);
        assert_eq!(
            risk.shutdown_record().await.map(|s| s.reason),
            Some(ShutdownReason::RepeatedFailures)
        );
    }

    #[tokio::test]
    async fn test_manual_trigger_and_metrics() {
        let store = Arc::new(InMemoryTradeStore::new());
        store.create_trade(new_trade("m1")).await.unwrap();
        let risk = engine(store, 995);

        risk.trigger_shutdown("operator halt").await;
        let metrics = risk.get_risk_metrics().await.unwrap();
        assert_eq!(metrics.portfolio_value, Decimal::new(1000, 0));
        assert_eq!(metrics.total_exposure, Decimal::new(5, 0));
        assert_eq!(metrics.active_trades, 1);
        assert!(metrics.emergency_shutdown);
        assert_eq!(metrics.shutdown_reason, Some(ShutdownReason::Manual));
        assert_eq!(metrics.position_size_pct, Decimal::new(5, 2));
    }

    #[tokio::test]
    async fn test_dry_run_fills_do_not_inflate_portfolio() {
        let store = Arc::new(InMemoryTradeStore::new());
        let risk = engine(store.clone(), 1000);
        let pct = risk.get_risk_metrics().await.unwrap().position_size_pct;

        // Just over the position limit of a $1000 portfolio.
        let mut over_limit = request(1, 50);
        over_limit.market_id = "m9".to_string();
        over_limit.size = (Decimal::new(1000, 0) * pct + Decimal::new(25, 2)) / over_limit.price;
        assert!(!risk.assess_trade_risk(&over_limit).await.approved);

        // Two dry-run fills: exchange cash stays at $1000.
        for market in ["m1", "m2"] {
            let mut new = new_trade(market);
            new.external_id = Some(format!("dry-run-{}", market));
            store.create_trade(new).await.unwrap();
        }

        let metrics = risk.get_risk_metrics().await.unwrap();
        assert_eq!(metrics.portfolio_value, Decimal::new(1000, 0));
        assert_eq!(metrics.cash_balance, Decimal::new(990, 0));
        assert_eq!(metrics.total_exposure, Decimal::new(10, 0));
        assert!(!risk.assess_trade_risk(&over_limit).await.approved);
    }
}
