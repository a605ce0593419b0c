//! Integration tests for component interactions.
//!
//! These wire the real strategies, risk engine, trading engine, in-memory
//! trade store and paper exchange together over scripted market data.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use polymarket_core::providers::HealthStatus;
use polymarket_core::types::{Market, OrderBook, PriceLevel, Token};
use polymarket_core::{MarketDataProvider, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

fn dec(value: i64, scale: u32) -> Decimal {
    Decimal::new(value, scale)
}

/// Market data served from memory; tests move it between cycles.
#[derive(Default)]
struct ScriptedMarkets {
    markets: Mutex<Vec<Market>>,
    books: Mutex<HashMap<String, OrderBook>>,
}

impl ScriptedMarkets {
    /// List a market resolving in `hours` with one token per `(outcome, mid)`
    /// quoted at a 0.01 spread.
    fn list(
        &self,
        id: &str,
        question: &str,
        hours: i64,
        volume_24h: i64,
        outcomes: &[(&str, Decimal)],
    ) {
        let mut tokens = Vec::new();
        let mut books = self.books.lock().unwrap();
        for (outcome, mid) in outcomes {
            let token_id = format!("{}-{}", id, outcome.to_lowercase());
            let half = dec(5, 3);
            books.insert(
                token_id.clone(),
                OrderBook {
                    market_id: id.to_string(),
                    token_id: token_id.clone(),
                    timestamp: Utc::now(),
                    bids: vec![PriceLevel {
                        price: *mid - half,
                        size: dec(500, 0),
                    }],
                    asks: vec![PriceLevel {
                        price: *mid + half,
                        size: dec(500, 0),
                    }],
                },
            );
            tokens.push(Token {
                token_id,
                market_id: id.to_string(),
                outcome: outcome.to_string(),
                best_bid: None,
                best_ask: None,
                mid_price: Some(*mid),
                volume_24h: Decimal::ZERO,
            });
        }

        self.markets.lock().unwrap().push(Market {
            id: id.to_string(),
            condition_id: None,
            question: question.to_string(),
            description: None,
            category: None,
            tokens,
            volume: Decimal::from(volume_24h * 10),
            volume_24h: Decimal::from(volume_24h),
            liquidity: Decimal::ZERO,
            end_date: Some(Utc::now() + Duration::hours(hours)),
            active: true,
            closed: false,
            resolved: false,
            winning_outcome: None,
        });
    }

    fn resolve(&self, id: &str, winner: &str) {
        for market in self.markets.lock().unwrap().iter_mut() {
            if market.id == id {
                market.closed = true;
                market.resolved = true;
                market.winning_outcome = Some(winner.to_string());
            }
        }
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedMarkets {
    async fn list_markets(&self, _active: bool, limit: usize, offset: usize) -> Result<Vec<Market>> {
        let markets = self.markets.lock().unwrap();
        Ok(markets.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        let markets = self.markets.lock().unwrap();
        Ok(markets.iter().find(|m| m.id == market_id).cloned())
    }

    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>> {
        Ok(self.books.lock().unwrap().get(token_id).cloned())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::connected())
    }
}

/// Test settlement P&L for winning and losing BUY positions.
#[tokio::test]
async fn test_settlement_pnl_formula() {
    use polymarket_core::db::{InMemoryTradeStore, TradeStore};
    use polymarket_core::types::{NewTrade, OrderSide, TradeStatus, TradeType, TradeUpdate};

    let store = InMemoryTradeStore::new();
    let trade = store
        .create_trade(NewTrade {
            market_id: "m1".to_string(),
            token_id: "m1-yes".to_string(),
            outcome: "Yes".to_string(),
            trade_type: TradeType::Endgame,
            side: OrderSide::Buy,
            size: dec(10, 0),
            price: dec(20, 2),
            status: TradeStatus::Executed,
            external_id: Some("order-1".to_string()),
            strategy_data: serde_json::Value::Null,
            expected_probability: None,
            expected_return_pct: None,
            stop_loss_for: None,
            risk_score: None,
        })
        .await
        .unwrap();
    assert_eq!(trade.cost_basis, dec(2, 0));

    let filled = store
        .update_trade_status(
            trade.id,
            TradeStatus::Filled,
            TradeUpdate {
                filled_size: Some(dec(10, 0)),
                average_price: Some(dec(20, 2)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(filled.settlement_pnl(Decimal::ONE), dec(8, 0));
    assert_eq!(filled.settlement_pnl(Decimal::ZERO), dec(-2, 0));

    let mut short = filled.clone();
    short.side = OrderSide::Sell;
    assert_eq!(short.settlement_pnl(Decimal::ONE), dec(-8, 0));
}

/// Test that a realized daily loss blocks every trade at CRITICAL.
#[tokio::test]
async fn test_daily_loss_blocks_any_trade() {
    use polymarket_core::db::{InMemoryTradeStore, TradeStore};
    use polymarket_core::types::{NewTrade, OrderSide, TradeStatus, TradeType, TradeUpdate};
    use risk_manager::{MarketContext, RiskEngine, RiskLevel, TradeRiskRequest};
    use std::sync::Arc;
    use trading_engine::PaperExchange;

    let store = Arc::new(InMemoryTradeStore::new());
    let trade = store
        .create_trade(NewTrade {
            market_id: "lost".to_string(),
            token_id: "lost-yes".to_string(),
            outcome: "Yes".to_string(),
            trade_type: TradeType::Endgame,
            side: OrderSide::Buy,
            size: dec(100, 0),
            price: dec(60, 2),
            status: TradeStatus::Executed,
            external_id: Some("order-1".to_string()),
            strategy_data: serde_json::Value::Null,
            expected_probability: None,
            expected_return_pct: None,
            stop_loss_for: None,
            risk_score: None,
        })
        .await
        .unwrap();
    store
        .update_trade_status(
            trade.id,
            TradeStatus::Resolved,
            TradeUpdate {
                realized_pnl: Some(dec(-60, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let risk = RiskEngine::new(
        Default::default(),
        store,
        Arc::new(PaperExchange::new(dec(1000, 0))),
    );

    for (size, price, probability) in [(1, 96, 96), (5, 50, 99), (1, 99, 100)] {
        let assessment = risk
            .assess_trade_risk(&TradeRiskRequest {
                market_id: "fresh".to_string(),
                token_id: "fresh-yes".to_string(),
                trade_type: TradeType::Endgame,
                size: dec(size, 0),
                price: dec(price, 2),
                probability: dec(probability, 2),
                market: MarketContext {
                    volume_24h: dec(50000, 0),
                    hours_to_resolution: Some(dec(12, 0)),
                },
            })
            .await;
        assert!(!assessment.approved);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert_eq!(assessment.max_position_size, Decimal::ZERO);
    }
}

/// Test that the emergency shutdown stays latched until reset.
#[tokio::test]
async fn test_emergency_shutdown_sticky_until_reset() {
    use polymarket_core::db::InMemoryTradeStore;
    use risk_manager::{RiskEngine, ShutdownReason};
    use std::sync::Arc;
    use trading_engine::PaperExchange;

    let risk = RiskEngine::new(
        Default::default(),
        Arc::new(InMemoryTradeStore::new()),
        Arc::new(PaperExchange::new(dec(1000, 0))),
    );
    assert!(!risk.check_emergency_shutdown().await);

    risk.trigger_shutdown("operator halt").await;
    for _ in 0..5 {
        assert!(risk.check_emergency_shutdown().await);
    }
    assert_eq!(
        risk.shutdown_record().await.map(|r| r.reason),
        Some(ShutdownReason::Manual)
    );

    risk.reset_shutdown().await;
    assert!(!risk.is_shutdown());
    assert!(!risk.check_emergency_shutdown().await);
}

/// Test that the performance multiplier never falls as win rate rises.
#[test]
fn test_performance_multiplier_is_monotonic() {
    use risk_manager::limits::performance_multiplier;

    let win_rates = [0, 20, 39, 40, 45, 49, 50, 60, 70, 71, 80, 81, 90, 100];
    let multipliers: Vec<Decimal> = win_rates
        .iter()
        .map(|&rate| performance_multiplier(dec(rate, 2)))
        .collect();

    for pair in multipliers.windows(2) {
        assert!(pair[0] <= pair[1], "{:?}", multipliers);
    }
    assert_eq!(multipliers[0], dec(5, 1));
    assert_eq!(multipliers[multipliers.len() - 1], dec(15, 1));
}

/// Test the endgame scanner picks the 0.96 outcome with a 4.17% return.
#[tokio::test]
async fn test_endgame_scan_selects_favourite() {
    use opportunity_scanner::{EndgameStrategy, OpportunityStrategy};
    use polymarket_core::config::EndgameConfig;
    use std::sync::Arc;

    let markets = Arc::new(ScriptedMarkets::default());
    markets.list(
        "bill",
        "Will the bill pass the senate?",
        24,
        5000,
        &[("Yes", dec(96, 2)), ("No", dec(4, 2))],
    );

    let strategy = EndgameStrategy::new(EndgameConfig::default(), markets);
    let found = strategy.scan_opportunities().await.unwrap();
    assert_eq!(found.len(), 1);

    let opportunity = &found[0];
    assert_eq!(opportunity.legs[0].token_id, "bill-yes");
    assert!((opportunity.expected_return_pct - dec(417, 2)).abs() < dec(1, 2));

    // Slightly under 24h remain by scan time, so the ratio lands just above 365.
    let annualized = opportunity.annualized_return_pct.unwrap();
    let ratio = annualized / opportunity.expected_return_pct;
    assert!(ratio >= dec(365, 0) && ratio < dec(366, 0), "{}", ratio);
}

/// Test that intra-market flags a 0.95 basket and ignores a 0.99 one.
#[tokio::test]
async fn test_intra_market_price_sum_ceiling() {
    use opportunity_scanner::{IntraMarketStrategy, OpportunityStrategy};
    use polymarket_core::config::IntraMarketConfig;
    use std::sync::Arc;

    let markets = Arc::new(ScriptedMarkets::default());
    markets.list(
        "cheap",
        "Will the merger close?",
        72,
        5000,
        &[("Yes", dec(55, 2)), ("No", dec(40, 2))],
    );
    markets.list(
        "fair",
        "Will the launch slip?",
        72,
        5000,
        &[("Yes", dec(60, 2)), ("No", dec(39, 2))],
    );

    let strategy = IntraMarketStrategy::new(IntraMarketConfig::default(), markets);
    let found = strategy.scan_opportunities().await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].market_id, "cheap");
    assert_eq!(found[0].legs.len(), 2);
}

/// Test that cross-platform stays quiet until an external venue is enabled.
#[tokio::test]
async fn test_cross_platform_disabled_without_external_venue() {
    use opportunity_scanner::{CrossPlatformStrategy, OpportunityStrategy};
    use polymarket_core::config::CrossPlatformConfig;
    use polymarket_core::providers::StaticExternalMarkets;
    use std::sync::Arc;

    let markets = Arc::new(ScriptedMarkets::default());
    markets.list("fed", "Will the Fed cut rates?", 72, 5000, &[("Yes", dec(40, 2))]);

    let strategy = CrossPlatformStrategy::new(
        CrossPlatformConfig::default(),
        markets,
        Arc::new(StaticExternalMarkets::new("kalshi", Vec::new())),
    );

    assert!(!strategy.is_enabled());
    assert!(strategy.scan_opportunities().await.unwrap().is_empty());
}

/// Test scan, execution, fill and resolution through the whole stack.
#[tokio::test]
async fn test_endgame_trade_lifecycle() {
    use opportunity_scanner::{EndgameStrategy, OpportunityStrategy};
    use polymarket_core::config::{EndgameConfig, EngineConfig};
    use polymarket_core::db::{InMemoryTradeStore, TradeStore};
    use polymarket_core::types::TradeStatus;
    use polymarket_core::ExecutionProvider;
    use risk_manager::RiskEngine;
    use std::sync::Arc;
    use trading_engine::{PaperExchange, TradingEngine};

    let markets = Arc::new(ScriptedMarkets::default());
    markets.list(
        "bill",
        "Will the bill pass the senate?",
        24,
        5000,
        &[("Yes", dec(96, 2)), ("No", dec(4, 2))],
    );
    let store = Arc::new(InMemoryTradeStore::new());
    let exchange = Arc::new(PaperExchange::new(dec(1000, 0)));
    let strategy: Arc<dyn OpportunityStrategy> = Arc::new(EndgameStrategy::new(
        EndgameConfig::default(),
        markets.clone(),
    ));
    let risk = Arc::new(RiskEngine::new(
        Default::default(),
        store.clone(),
        exchange.clone(),
    ));
    let engine = TradingEngine::new(
        EngineConfig {
            dry_run: false,
            ..Default::default()
        },
        risk,
        store.clone(),
        markets.clone(),
        exchange.clone(),
        vec![strategy],
    );

    engine.run_cycle().await.unwrap();

    let logs = store.opportunity_logs();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].executed);
    let trade_id = logs[0].trade_id.expect("executed log links its trade");

    // max size $20.83 at 0.96 caps the order at 21.70 shares
    let trade = store.get_trade(trade_id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Executed);
    assert_eq!(trade.size, dec(2170, 2));
    assert_eq!(trade.price, dec(96, 2));

    engine.monitor_active_trades().await.unwrap();
    let trade = store.get_trade(trade_id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Filled);
    assert_eq!(trade.filled_size, dec(2170, 2));

    markets.resolve("bill", "Yes");
    engine.monitor_active_trades().await.unwrap();
    let trade = store.get_trade(trade_id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Resolved);
    // 21.70 * (1 - 0.96)
    assert_eq!(trade.realized_pnl, Some(dec(868, 3)));
    assert!(trade.resolved_at.is_some());

    assert_eq!(exchange.get_cash_balance().await.unwrap(), dec(1000868, 3));
    assert!(store.get_active_trades().await.unwrap().is_empty());
}

/// Test that executed logs reference their trade and rejected ones explain why.
#[tokio::test]
async fn test_opportunity_log_links() {
    use opportunity_scanner::{EndgameStrategy, OpportunityStrategy};
    use polymarket_core::config::{EndgameConfig, EngineConfig, RiskConfig};
    use polymarket_core::db::{InMemoryTradeStore, TradeStore};
    use risk_manager::RiskEngine;
    use std::sync::Arc;
    use trading_engine::{PaperExchange, TradingEngine};

    let markets = Arc::new(ScriptedMarkets::default());
    // The 0.96 market ranks first on return and takes the only trade slot.
    markets.list("first", "Will the vote pass?", 30, 5000, &[("Yes", dec(96, 2))]);
    markets.list("second", "Will the index close up?", 30, 5000, &[("Yes", dec(97, 2))]);

    let store = Arc::new(InMemoryTradeStore::new());
    let exchange = Arc::new(PaperExchange::new(dec(1000, 0)));
    let strategy: Arc<dyn OpportunityStrategy> = Arc::new(EndgameStrategy::new(
        EndgameConfig::default(),
        markets.clone(),
    ));
    let risk = Arc::new(RiskEngine::new(
        RiskConfig {
            max_concurrent_trades: 1,
            ..Default::default()
        },
        store.clone(),
        exchange.clone(),
    ));
    let engine = TradingEngine::new(
        EngineConfig {
            dry_run: false,
            ..Default::default()
        },
        risk,
        store.clone(),
        markets,
        exchange,
        vec![strategy],
    );

    engine.run_cycle().await.unwrap();

    let logs = store.opportunity_logs();
    assert_eq!(logs.len(), 2);

    let executed: Vec<_> = logs.iter().filter(|l| l.executed).collect();
    let rejected: Vec<_> = logs.iter().filter(|l| !l.executed).collect();
    assert_eq!(executed.len(), 1);
    assert_eq!(rejected.len(), 1);

    let trade_id = executed[0].trade_id.unwrap();
    let trade = store.get_trade(trade_id).await.unwrap().unwrap();
    assert_eq!(trade.id, trade_id);
    assert_eq!(trade.market_id, "first");
    assert_eq!(executed[0].market_id, "first");
    assert!(executed[0].rejection_reason.is_none());

    assert!(rejected[0].trade_id.is_none());
    let reason = rejected[0].rejection_reason.as_deref().unwrap_or_default();
    assert!(reason.contains("Max concurrent trades"), "{}", reason);
}

/// Test that an intra-market basket buys equal shares of both outcomes.
#[tokio::test]
async fn test_intra_market_basket_execution() {
    use opportunity_scanner::{IntraMarketStrategy, OpportunityStrategy};
    use polymarket_core::config::{EngineConfig, IntraMarketConfig};
    use polymarket_core::db::{InMemoryTradeStore, TradeStore};
    use polymarket_core::types::{OrderSide, TradeType};
    use risk_manager::RiskEngine;
    use std::sync::Arc;
    use trading_engine::{PaperExchange, TradingEngine};

    let markets = Arc::new(ScriptedMarkets::default());
    markets.list(
        "cheap",
        "Will the merger close?",
        72,
        5000,
        &[("Yes", dec(55, 2)), ("No", dec(40, 2))],
    );
    let store = Arc::new(InMemoryTradeStore::new());
    let exchange = Arc::new(PaperExchange::new(dec(5000, 0)));
    let strategy: Arc<dyn OpportunityStrategy> = Arc::new(IntraMarketStrategy::new(
        IntraMarketConfig::default(),
        markets.clone(),
    ));
    let risk = Arc::new(RiskEngine::new(
        Default::default(),
        store.clone(),
        exchange.clone(),
    ));
    let engine = TradingEngine::new(
        EngineConfig {
            dry_run: false,
            ..Default::default()
        },
        risk,
        store.clone(),
        markets,
        exchange,
        vec![strategy],
    );

    engine.run_cycle().await.unwrap();

    let trades = store.get_trades_by_market("cheap").await.unwrap();
    assert_eq!(trades.len(), 2);
    assert!(trades.iter().all(|t| t.trade_type == TradeType::IntraMarket));
    assert!(trades.iter().all(|t| t.side == OrderSide::Buy));
    assert_eq!(trades[0].size, trades[1].size);
    assert!(trades[0].size > Decimal::ZERO);

    let logs = store.opportunity_logs();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].executed);
    assert!(trades.iter().any(|t| Some(t.id) == logs[0].trade_id));
}

/// Test that a $6 loss on a $10 position stops out above the probability threshold.
#[tokio::test]
async fn test_stop_loss_on_unrealized_loss() {
    use polymarket_core::db::{InMemoryTradeStore, TradeStore};
    use polymarket_core::types::{NewTrade, OrderSide, TradeStatus, TradeType, TradeUpdate};
    use risk_manager::RiskEngine;
    use std::sync::Arc;
    use trading_engine::PaperExchange;

    let store = Arc::new(InMemoryTradeStore::new());
    let trade = store
        .create_trade(NewTrade {
            market_id: "m1".to_string(),
            token_id: "m1-yes".to_string(),
            outcome: "Yes".to_string(),
            trade_type: TradeType::Endgame,
            side: OrderSide::Buy,
            size: dec(20, 0),
            price: dec(50, 2),
            status: TradeStatus::Executed,
            external_id: Some("order-1".to_string()),
            strategy_data: serde_json::Value::Null,
            expected_probability: None,
            expected_return_pct: None,
            stop_loss_for: None,
            risk_score: None,
        })
        .await
        .unwrap();
    let filled = store
        .update_trade_status(
            trade.id,
            TradeStatus::Filled,
            TradeUpdate {
                filled_size: Some(dec(20, 0)),
                average_price: Some(dec(50, 2)),
                unrealized_pnl: Some(dec(-6, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filled.cost_basis, dec(10, 0));

    let risk = RiskEngine::new(
        Default::default(),
        store,
        Arc::new(PaperExchange::new(dec(1000, 0))),
    );

    assert!(risk.should_stop_loss(&filled, dec(95, 2)).await);

    let mut shallow = filled.clone();
    shallow.unrealized_pnl = Some(dec(-4, 0));
    assert!(!risk.should_stop_loss(&shallow, dec(95, 2)).await);
}
