//! Trading engine state machine and main loop.
//!
//! One spawned task runs cycles strictly one after another: monitor active
//! trades, scan the enabled strategies, then risk-check and execute the best
//! candidates.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use futures_util::future::join_all;
use opportunity_scanner::{OpportunityStrategy, StrategyStatus};
use polymarket_core::config::EngineConfig;
use polymarket_core::db::TradeStore;
use polymarket_core::types::{
    NewOpportunityLog, NewTrade, Opportunity, OrderRequest, PortfolioSnapshot, PriceQuote, Trade,
    TradeStatus, TradeType, TradeUpdate,
};
use polymarket_core::{ExecutionProvider, MarketDataProvider};
use risk_manager::{ExposureTracker, MarketContext, RiskEngine, RiskMetrics, TradeRiskRequest};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::executor::OrderExecutor;

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    /// Terminal until [`TradingEngine::reset_emergency`].
    EmergencyShutdown,
    Error,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Pausing => "pausing",
            EngineState::Paused => "paused",
            EngineState::EmergencyShutdown => "emergency_shutdown",
            EngineState::Error => "error",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct CycleStats {
    cycle_count: u64,
    opportunities_found: u64,
    trades_executed: u64,
    last_cycle: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Snapshot of engine activity for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub dry_run: bool,
    pub cycle_count: u64,
    pub opportunities_found: u64,
    pub trades_executed: u64,
    pub outstanding_orders: usize,
    pub last_cycle: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    /// `None` when the risk figures could not be computed.
    pub risk_metrics: Option<RiskMetrics>,
    pub strategies: Vec<StrategyStatus>,
}

/// Autonomous trading controller.
///
/// Every collaborator is injected; nothing here is process-global.
pub struct TradingEngine {
    config: RwLock<EngineConfig>,
    state: RwLock<EngineState>,
    pub(crate) risk: Arc<RiskEngine>,
    pub(crate) store: Arc<dyn TradeStore>,
    pub(crate) market_data: Arc<dyn MarketDataProvider>,
    pub(crate) execution: Arc<dyn ExecutionProvider>,
    pub(crate) executor: OrderExecutor,
    strategies: BTreeMap<TradeType, Arc<dyn OpportunityStrategy>>,
    stats: RwLock<CycleStats>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TradingEngine {
    pub fn new(
        config: EngineConfig,
        risk: Arc<RiskEngine>,
        store: Arc<dyn TradeStore>,
        market_data: Arc<dyn MarketDataProvider>,
        execution: Arc<dyn ExecutionProvider>,
        strategies: Vec<Arc<dyn OpportunityStrategy>>,
    ) -> Self {
        let executor = OrderExecutor::new(Arc::clone(&execution), config.dry_run);
        let strategies = strategies
            .into_iter()
            .map(|strategy| (strategy.trade_type(), strategy))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config: RwLock::new(config),
            state: RwLock::new(EngineState::Stopped),
            risk,
            store,
            market_data,
            execution,
            executor,
            strategies,
            stats: RwLock::new(CycleStats::default()),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    async fn set_state(&self, next: EngineState) {
        let mut state = self.state.write().await;
        if *state != next {
            info!(from = %*state, to = %next, "Engine state changed");
            *state = next;
        }
    }

    /// Move `from -> to` only if the engine is still in `from`.
    async fn transition(&self, from: EngineState, to: EngineState) -> bool {
        let mut state = self.state.write().await;
        if *state != from {
            return false;
        }
        info!(from = %from, to = %to, "Engine state changed");
        *state = to;
        true
    }

    pub async fn config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: EngineConfig) {
        self.executor.set_dry_run(config.dry_run);
        *self.config.write().await = config;
        info!("Engine config updated");
    }

    /// Strategy registered for a trade type.
    pub fn strategy(&self, trade_type: TradeType) -> Option<&Arc<dyn OpportunityStrategy>> {
        self.strategies.get(&trade_type)
    }

    /// Verify connectivity and launch the trading loop. Only valid from STOPPED.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Stopped {
                bail!("cannot start engine from state {}", *state);
            }
            *state = EngineState::Starting;
        }
        info!(
            dry_run = self.executor.is_dry_run(),
            strategies = self.strategies.len(),
            "Starting trading engine"
        );

        if let Err(e) = self.verify_connections().await {
            error!(error = %e, "Engine startup failed");
            self.set_state(EngineState::Error).await;
            return Err(e);
        }

        {
            let mut stats = self.stats.write().await;
            stats.started_at = Some(Utc::now());
            stats.consecutive_failures = 0;
        }

        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.set_state(EngineState::Running).await;

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_loop(shutdown_rx).await });
        *self.loop_handle.lock().await = Some(handle);

        info!("Trading engine started");
        Ok(())
    }

    async fn verify_connections(&self) -> Result<()> {
        let market_data = self
            .market_data
            .health_check()
            .await
            .context("market data health check failed")?;
        if !market_data.connected {
            bail!(
                "market data provider not connected: {}",
                market_data.detail.unwrap_or_default()
            );
        }

        let execution = self
            .execution
            .health_check()
            .await
            .context("execution health check failed")?;
        if !execution.connected {
            bail!(
                "execution provider not connected: {}",
                execution.detail.unwrap_or_default()
            );
        }

        let cash = self
            .execution
            .get_cash_balance()
            .await
            .context("failed to read cash balance")?;
        info!(cash_balance = %cash, "Providers connected");
        Ok(())
    }

    /// Graceful stop: let the in-flight cycle finish, then cancel outstanding orders.
    pub async fn stop(&self) -> Result<()> {
        let current = self.state().await;
        if !matches!(
            current,
            EngineState::Running | EngineState::Pausing | EngineState::Paused | EngineState::Error
        ) {
            bail!("cannot stop engine from state {}", current);
        }

        info!("Stopping trading engine");
        self.shutdown_tx.send_replace(true);

        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Trading loop terminated abnormally");
                }
            }
        }

        let cancelled = self.executor.cancel_all().await;

        let mut state = self.state.write().await;
        if *state == EngineState::EmergencyShutdown {
            warn!("Emergency shutdown occurred while stopping, state kept");
        } else {
            *state = EngineState::Stopped;
            info!(cancelled_orders = cancelled, "Trading engine stopped");
        }
        Ok(())
    }

    /// Halt immediately without waiting for the current cycle.
    ///
    /// Latches the risk engine's shutdown so the engine cannot resume until
    /// [`reset_emergency`](Self::reset_emergency).
    pub async fn emergency_shutdown(&self, reason: &str) {
        self.enter_emergency(reason).await;
        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn enter_emergency(&self, reason: &str) {
        error!(critical = true, reason = %reason, "EMERGENCY SHUTDOWN");
        self.set_state(EngineState::EmergencyShutdown).await;
        if !self.risk.is_shutdown() {
            self.risk.trigger_shutdown(reason).await;
        }
        self.shutdown_tx.send_replace(true);

        let cancelled = self.executor.cancel_all().await;
        warn!(cancelled_orders = cancelled, "Outstanding orders cancelled after emergency shutdown");
    }

    /// Operator action: clear the sticky shutdown and return to STOPPED.
    pub async fn reset_emergency(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != EngineState::EmergencyShutdown {
            bail!("engine is not in emergency shutdown (state {})", *state);
        }
        self.risk.reset_shutdown().await;
        *state = EngineState::Stopped;
        info!("Emergency shutdown cleared, engine stopped");
        Ok(())
    }

    /// Ask the loop to stop trading after the current cycle.
    pub async fn pause(&self) -> Result<()> {
        if !self.transition(EngineState::Running, EngineState::Pausing).await {
            bail!("cannot pause engine from state {}", self.state().await);
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        if self.transition(EngineState::Paused, EngineState::Running).await
            || self.transition(EngineState::Pausing, EngineState::Running).await
        {
            info!("Trading engine resumed");
            return Ok(());
        }
        bail!("cannot resume engine from state {}", self.state().await)
    }

    async fn run_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Trading loop started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if self.risk.check_emergency_shutdown().await {
                // Nothing latched means the check itself failed.
                let detail = self
                    .risk
                    .shutdown_record()
                    .await
                    .map(|record| record.detail)
                    .unwrap_or_else(|| "emergency check failed".to_string());
                self.enter_emergency(&detail).await;
                break;
            }

            match self.state().await {
                EngineState::Pausing => {
                    if self.transition(EngineState::Pausing, EngineState::Paused).await {
                        info!("Trading engine paused");
                    }
                }
                EngineState::Paused => debug!("Engine paused, skipping cycle"),
                EngineState::Running => {
                    if !self.run_cycle_tracked().await {
                        self.set_state(EngineState::Error).await;
                        break;
                    }
                }
                _ => break,
            }

            let heartbeat = Duration::from_secs(self.config.read().await.heartbeat_interval_secs);
            tokio::select! {
                _ = tokio::time::sleep(heartbeat) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Trading loop exited");
    }

    /// Run one cycle and track consecutive failures.
    ///
    /// Returns `false` once the failure limit is reached.
    async fn run_cycle_tracked(&self) -> bool {
        let max_failures = self.config.read().await.max_consecutive_cycle_failures;
        match self.run_cycle().await {
            Ok(()) => {
                self.stats.write().await.consecutive_failures = 0;
                true
            }
            Err(e) => {
                let mut stats = self.stats.write().await;
                stats.consecutive_failures += 1;
                error!(
                    error = %e,
                    consecutive_failures = stats.consecutive_failures,
                    "Trading cycle failed"
                );
                if stats.consecutive_failures >= max_failures {
                    error!(
                        consecutive_failures = stats.consecutive_failures,
                        "Too many consecutive cycle failures"
                    );
                    return false;
                }
                true
            }
        }
    }

    /// One trading cycle: monitor, scan, then evaluate candidates in rank order.
    pub async fn run_cycle(&self) -> Result<()> {
        let started = Instant::now();
        let config = self.config.read().await.clone();

        self.monitor_active_trades()
            .await
            .context("trade monitoring failed")?;

        let opportunities = self.scan_strategies(config.max_opportunities_per_cycle).await;

        let mut executed = 0;
        for opportunity in &opportunities {
            if self.risk.is_shutdown() {
                warn!("Emergency shutdown latched, skipping remaining opportunities");
                break;
            }
            match self.evaluate_opportunity(opportunity, &config).await {
                Ok(count) => executed += count,
                Err(e) => warn!(
                    market_id = %opportunity.market_id,
                    trade_type = %opportunity.trade_type,
                    error = %e,
                    "Failed to evaluate opportunity"
                ),
            }
        }

        let cycle = {
            let mut stats = self.stats.write().await;
            stats.cycle_count += 1;
            stats.opportunities_found += opportunities.len() as u64;
            stats.trades_executed += executed as u64;
            stats.last_cycle = Some(Utc::now());
            stats.cycle_count
        };

        debug!(
            cycle,
            opportunities = opportunities.len(),
            trades_executed = executed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Trading cycle complete"
        );

        if config.status_log_interval_cycles > 0 && cycle % config.status_log_interval_cycles == 0 {
            self.log_status().await;
            if let Err(e) = self.record_portfolio_snapshot().await {
                warn!(error = %e, "Failed to record portfolio snapshot");
            }
        }

        Ok(())
    }

    /// Scan every enabled strategy concurrently and merge the ranked results.
    async fn scan_strategies(&self, limit: usize) -> Vec<Opportunity> {
        let enabled: Vec<&Arc<dyn OpportunityStrategy>> = self
            .strategies
            .values()
            .filter(|strategy| strategy.is_enabled())
            .collect();

        let results = join_all(enabled.iter().map(|strategy| strategy.scan_opportunities())).await;

        let mut merged = Vec::new();
        for (strategy, result) in enabled.iter().zip(results) {
            match result {
                Ok(found) => {
                    debug!(strategy = strategy.name(), found = found.len(), "Strategy scan complete");
                    merged.extend(found);
                }
                Err(e) => warn!(strategy = strategy.name(), error = %e, "Strategy scan failed"),
            }
        }

        rank_opportunities(&mut merged);
        merged.truncate(limit);
        merged
    }

    /// Log, risk-check and execute one candidate. Returns the number of legs placed.
    async fn evaluate_opportunity(
        &self,
        opportunity: &Opportunity,
        config: &EngineConfig,
    ) -> Result<usize> {
        let log = self
            .store
            .log_opportunity(NewOpportunityLog::from_opportunity(opportunity))
            .await
            .context("failed to log opportunity")?;

        let unit_price = opportunity.unit_price();
        let Some(primary) = opportunity.primary_leg() else {
            self.reject(log.id, opportunity, "opportunity has no legs").await?;
            return Ok(0);
        };
        if unit_price <= Decimal::ZERO {
            self.reject(log.id, opportunity, "opportunity has no positive price").await?;
            return Ok(0);
        }

        let request = TradeRiskRequest {
            market_id: opportunity.market_id.clone(),
            token_id: primary.token_id.clone(),
            trade_type: opportunity.trade_type,
            size: opportunity.suggested_size / unit_price,
            price: unit_price,
            probability: opportunity.probability,
            market: MarketContext {
                volume_24h: opportunity.volume_24h,
                hours_to_resolution: opportunity.hours_to_resolution,
            },
        };
        let assessment = self.risk.assess_trade_risk(&request).await;
        if !assessment.approved {
            self.reject(log.id, opportunity, &assessment.rejection_summary())
                .await?;
            return Ok(0);
        }

        let shares = execution_size(
            assessment.max_position_size,
            opportunity.max_size,
            unit_price,
        );
        if shares < config.min_trade_size {
            self.reject(log.id, opportunity, "trade size too small").await?;
            return Ok(0);
        }

        let orders: Vec<OrderRequest> = opportunity
            .legs
            .iter()
            .map(|leg| {
                OrderRequest::new(&opportunity.market_id, &leg.token_id, leg.side, shares, leg.price)
            })
            .collect();
        if let Some(e) = orders.iter().find_map(|order| order.validate().err()) {
            self.reject(log.id, opportunity, &e.to_string()).await?;
            return Ok(0);
        }

        let strategy_data = serde_json::json!({
            "question": opportunity.question,
            "details": opportunity.details,
        });

        let risk_score = Some(assessment.risk_level.score());
        let mut placed: Vec<Trade> = Vec::with_capacity(orders.len());
        let mut refused = false;
        let mut execution_error = None;
        for (leg, order) in opportunity.legs.iter().zip(&orders) {
            let new = NewTrade {
                market_id: opportunity.market_id.clone(),
                token_id: leg.token_id.clone(),
                outcome: leg.outcome.clone(),
                trade_type: opportunity.trade_type,
                side: leg.side,
                size: shares,
                price: leg.price,
                status: TradeStatus::Pending,
                external_id: None,
                strategy_data: strategy_data.clone(),
                expected_probability: Some(opportunity.probability),
                expected_return_pct: Some(opportunity.expected_return_pct),
                stop_loss_for: None,
                risk_score,
            };
            match self.place_leg(new, order).await {
                Ok(Some(trade)) => {
                    info!(
                        trade_id = %trade.id,
                        order_id = ?trade.external_id,
                        market_id = %opportunity.market_id,
                        trade_type = %opportunity.trade_type,
                        side = %leg.side,
                        size = %shares,
                        price = %leg.price,
                        risk_level = %assessment.risk_level,
                        "Trade executed"
                    );
                    placed.push(trade);
                }
                Ok(None) => {
                    refused = true;
                    break;
                }
                Err(e) => {
                    execution_error = Some(e);
                    break;
                }
            }
        }

        if !refused && execution_error.is_none() {
            let first = placed.first().map(|trade| trade.id);
            self.store
                .mark_opportunity_executed(log.id, first)
                .await
                .context("failed to link opportunity to trade")?;
            return Ok(placed.len());
        }

        // A basket is all or nothing: close out whatever was placed.
        self.unwind_legs(&placed).await;

        if let Some(e) = execution_error {
            let reason = format!("order execution error: {:#}", e);
            if let Err(reject_err) = self.reject(log.id, opportunity, &reason).await {
                warn!(log_id = %log.id, error = %reject_err, "Opportunity left undecided");
            }
            return Err(e);
        }

        let reason = if placed.is_empty() {
            "order placement failed"
        } else {
            "basket incomplete, placed legs unwound"
        };
        self.reject(log.id, opportunity, reason).await?;
        Ok(0)
    }

    /// Persist and submit one leg.
    ///
    /// Returns `None` when the exchange did not take the order; the trade is
    /// then FAILED. An accepted order that cannot be recorded is cancelled
    /// before the error is returned.
    async fn place_leg(&self, new: NewTrade, order: &OrderRequest) -> Result<Option<Trade>> {
        let trade = self
            .store
            .create_trade(new)
            .await
            .context("failed to persist trade")?;

        let order_id = match self.executor.place_order(order).await {
            Ok(Some(order_id)) => order_id,
            Ok(None) => {
                warn!(trade_id = %trade.id, token_id = %order.token_id, "Order not accepted");
                self.fail_trade(trade.id).await;
                return Ok(None);
            }
            Err(e) => {
                error!(trade_id = %trade.id, token_id = %order.token_id, error = %e, "Order placement failed");
                self.fail_trade(trade.id).await;
                return Ok(None);
            }
        };

        let update = TradeUpdate {
            external_id: Some(order_id.clone()),
            ..Default::default()
        };
        match self
            .store
            .update_trade_status(trade.id, TradeStatus::Executed, update)
            .await
        {
            Ok(executed) => Ok(Some(executed)),
            Err(e) => {
                error!(
                    trade_id = %trade.id,
                    order_id = %order_id,
                    error = %e,
                    "Accepted order could not be recorded, cancelling it"
                );
                match self.executor.cancel_order(&order_id).await {
                    Ok(true) => {}
                    Ok(false) => error!(order_id = %order_id, "Unrecorded order could not be cancelled"),
                    Err(cancel_err) => error!(order_id = %order_id, error = %cancel_err, "Unrecorded order cancel failed"),
                }
                self.fail_trade(trade.id).await;
                Err(e).context("failed to mark trade executed")
            }
        }
    }

    /// Close out the placed legs of a basket that could not be completed.
    ///
    /// Resting orders are cancelled; filled ones are offset through the
    /// stop-loss path so the exit is booked against the leg.
    async fn unwind_legs(&self, legs: &[Trade]) {
        for trade in legs {
            if let Err(e) = self.unwind_leg(trade).await {
                error!(trade_id = %trade.id, token_id = %trade.token_id, error = %e, "Failed to unwind basket leg");
            }
        }
    }

    async fn unwind_leg(&self, trade: &Trade) -> Result<()> {
        if let Some(order_id) = &trade.external_id {
            if self.executor.cancel_order(order_id).await? {
                self.store
                    .update_trade_status(trade.id, TradeStatus::Cancelled, TradeUpdate::default())
                    .await?;
                warn!(trade_id = %trade.id, order_id = %order_id, "Basket leg cancelled");
                return Ok(());
            }
        }

        let book = self
            .market_data
            .get_order_book(&trade.token_id)
            .await?
            .with_context(|| format!("no order book for {}", trade.token_id))?;
        let quote = PriceQuote::from_book(&trade.outcome, &book)
            .with_context(|| format!("one-sided order book for {}", trade.token_id))?;
        warn!(trade_id = %trade.id, token_id = %trade.token_id, "Offsetting unhedged basket leg");
        self.execute_stop_loss(trade, &quote).await
    }

    async fn reject(&self, log_id: Uuid, opportunity: &Opportunity, reason: &str) -> Result<()> {
        info!(
            market_id = %opportunity.market_id,
            trade_type = %opportunity.trade_type,
            reason = %reason,
            "Opportunity rejected"
        );
        self.store
            .mark_opportunity_rejected(log_id, reason)
            .await
            .context("failed to record rejection")
    }

    pub(crate) async fn fail_trade(&self, trade_id: Uuid) {
        if let Err(e) = self
            .store
            .update_trade_status(trade_id, TradeStatus::Failed, TradeUpdate::default())
            .await
        {
            error!(trade_id = %trade_id, error = %e, "Failed to mark trade failed");
        }
    }

    /// Upsert today's portfolio snapshot.
    pub async fn record_portfolio_snapshot(&self) -> Result<PortfolioSnapshot> {
        let now = Utc::now();
        let today = now.date_naive();
        let start_of_day = today.and_time(NaiveTime::MIN).and_utc();

        let active = self.store.get_active_trades().await?;
        let exposure = ExposureTracker::from_trades(&active);
        let cash_balance = exposure.available_cash(self.execution.get_cash_balance().await?);
        let positions_value = exposure.total_exposure();
        let unrealized_pnl: Decimal = active.iter().filter_map(|t| t.unrealized_pnl).sum();
        let total_value = cash_balance + positions_value;

        let trades_today = self.store.count_trades_since(start_of_day).await?;
        let performance = self.store.performance_since(start_of_day).await?;
        let previous = self.store.previous_portfolio_snapshot(today).await?;
        let earliest = self.store.earliest_portfolio_snapshot().await?;

        let peak = [
            earliest.as_ref().map(|s| s.total_value),
            previous.as_ref().map(|s| s.total_value),
            Some(total_value),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(total_value);
        let drawdown = if peak > Decimal::ZERO {
            (peak - total_value) / peak * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        let max_drawdown_pct = previous
            .as_ref()
            .and_then(|s| s.max_drawdown_pct)
            .map_or(drawdown, |prior| prior.max(drawdown));

        let snapshot = PortfolioSnapshot {
            date: today,
            total_value,
            cash_balance,
            positions_value,
            unrealized_pnl,
            daily_return_pct: previous
                .as_ref()
                .and_then(|s| return_pct(s.total_value, total_value)),
            total_return_pct: earliest
                .as_ref()
                .and_then(|s| return_pct(s.total_value, total_value)),
            max_drawdown_pct: Some(max_drawdown_pct),
            trades_today: u32::try_from(trades_today).unwrap_or(u32::MAX),
            winning_trades: performance
                .as_ref()
                .map_or(0, |p| u32::try_from(p.winning_trades).unwrap_or(u32::MAX)),
            losing_trades: performance
                .as_ref()
                .map_or(0, |p| u32::try_from(p.losing_trades).unwrap_or(u32::MAX)),
            created_at: now,
        };
        self.store.upsert_portfolio_snapshot(&snapshot).await?;

        info!(
            date = %snapshot.date,
            total_value = %snapshot.total_value,
            cash = %snapshot.cash_balance,
            positions = %snapshot.positions_value,
            trades_today = snapshot.trades_today,
            "Portfolio snapshot recorded"
        );
        Ok(snapshot)
    }

    pub async fn get_status(&self) -> EngineStatus {
        let stats = self.stats.read().await.clone();
        let risk_metrics = match self.risk.get_risk_metrics().await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                debug!(error = %e, "Risk metrics unavailable");
                None
            }
        };

        let mut strategies = Vec::with_capacity(self.strategies.len());
        for strategy in self.strategies.values() {
            strategies.push(strategy.status().await);
        }

        EngineStatus {
            state: self.state().await,
            dry_run: self.executor.is_dry_run(),
            cycle_count: stats.cycle_count,
            opportunities_found: stats.opportunities_found,
            trades_executed: stats.trades_executed,
            outstanding_orders: self.executor.outstanding_orders(),
            last_cycle: stats.last_cycle,
            uptime_secs: stats
                .started_at
                .map(|started| (Utc::now() - started).num_seconds()),
            risk_metrics,
            strategies,
        }
    }

    async fn log_status(&self) {
        let status = self.get_status().await;
        let (portfolio_value, daily_pnl, active_trades) = status
            .risk_metrics
            .as_ref()
            .map(|m| (m.portfolio_value, m.daily_pnl, m.active_trades))
            .unwrap_or_default();
        info!(
            state = %status.state,
            cycles = status.cycle_count,
            opportunities_found = status.opportunities_found,
            trades_executed = status.trades_executed,
            outstanding_orders = status.outstanding_orders,
            portfolio_value = %portfolio_value,
            daily_pnl = %daily_pnl,
            active_trades,
            "Engine status"
        );
        for strategy in &status.strategies {
            debug!(
                strategy = %strategy.name,
                enabled = strategy.enabled,
                scanned = strategy.opportunities_scanned,
                found = strategy.opportunities_found,
                errors = strategy.scan_errors,
                "Strategy status"
            );
        }
    }
}

/// Order candidates by expected return, then confidence, then market id.
pub fn rank_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.expected_return_pct
            .cmp(&a.expected_return_pct)
            .then_with(|| b.confidence_score.cmp(&a.confidence_score))
            .then_with(|| a.market_id.cmp(&b.market_id))
    });
}

/// Shares to trade: the risk-approved size bounded by the strategy's USD cap,
/// truncated to whole cents of a share.
pub fn execution_size(approved_shares: Decimal, max_size_usd: Decimal, unit_price: Decimal) -> Decimal {
    let cap = if unit_price > Decimal::ZERO {
        max_size_usd / unit_price
    } else {
        Decimal::ZERO
    };
    approved_shares
        .min(cap)
        .max(Decimal::ZERO)
        .round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Percentage change from `from` to `to`; `None` when `from` is not positive.
fn return_pct(from: Decimal, to: Decimal) -> Option<Decimal> {
    (from > Decimal::ZERO).then(|| (to - from) / from * Decimal::ONE_HUNDRED)
}
