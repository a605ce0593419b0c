//! Active trade monitoring: order fills, mark-to-market, stop-losses and
//! settlement of resolved markets.

use anyhow::{Context, Result};
use polymarket_core::types::{
    Market, NewTrade, OrderRequest, OrderSide, OrderStatus, PriceQuote, Trade, TradeStatus,
    TradeUpdate,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::engine::TradingEngine;

/// Markets fetched during one monitoring pass.
type MarketCache = HashMap<String, Option<Market>>;

const MIN_ORDER_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
const MAX_ORDER_PRICE: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

/// Limit price for a stop-loss order, `offset` through the touch.
///
/// Sells go below the best bid and buys above the best ask, clamped to the
/// tradable range.
pub fn stop_loss_price(side: OrderSide, quote: &PriceQuote, offset: Decimal) -> Decimal {
    let raw = match side {
        OrderSide::Sell => quote.best_bid * (Decimal::ONE - offset),
        OrderSide::Buy => quote.best_ask * (Decimal::ONE + offset),
    };
    raw.round_dp(4).clamp(MIN_ORDER_PRICE, MAX_ORDER_PRICE)
}

impl TradingEngine {
    /// Walk every active trade once. Per-trade failures are logged and skipped.
    pub async fn monitor_active_trades(&self) -> Result<()> {
        let trades = self
            .store
            .get_active_trades()
            .await
            .context("failed to load active trades")?;
        if trades.is_empty() {
            return Ok(());
        }
        debug!(active_trades = trades.len(), "Monitoring active trades");

        let mut markets = MarketCache::new();
        for trade in trades {
            let trade_id = trade.id;
            if let Err(e) = self.monitor_trade(trade, &mut markets).await {
                warn!(trade_id = %trade_id, error = %e, "Failed to monitor trade");
            }
        }
        Ok(())
    }

    async fn monitor_trade(&self, trade: Trade, markets: &mut MarketCache) -> Result<()> {
        // Earlier trades in this pass may have closed this one.
        let trade = match self.store.get_trade(trade.id).await? {
            Some(current) if current.status.is_active() => current,
            _ => return Ok(()),
        };

        let trade = if matches!(trade.status, TradeStatus::Pending | TradeStatus::Executed) {
            match self.refresh_order(trade).await? {
                Some(trade) => trade,
                None => return Ok(()),
            }
        } else {
            trade
        };

        if matches!(trade.status, TradeStatus::Executed | TradeStatus::Filled)
            && self.settle_if_resolved(&trade, markets).await?
        {
            return Ok(());
        }

        if trade.status == TradeStatus::Filled && !trade.is_stop_loss() {
            self.check_stop_loss(trade).await?;
        }
        Ok(())
    }

    /// Sync a trade with its order. Returns `None` once the trade is closed.
    async fn refresh_order(&self, trade: Trade) -> Result<Option<Trade>> {
        let Some(order_id) = trade.external_id.clone() else {
            if trade.status == TradeStatus::Pending {
                // Never acknowledged by the exchange.
                warn!(trade_id = %trade.id, "Pending trade has no order, cancelling");
                self.store
                    .update_trade_status(trade.id, TradeStatus::Cancelled, TradeUpdate::default())
                    .await?;
                return Ok(None);
            }
            return Ok(Some(trade));
        };

        let Some(report) = self.executor.order_status(&order_id).await? else {
            debug!(trade_id = %trade.id, order_id = %order_id, "Order status unavailable");
            return Ok(Some(trade));
        };

        match report.status {
            OrderStatus::Filled => {
                let filled = self
                    .store
                    .update_trade_status(
                        trade.id,
                        TradeStatus::Filled,
                        TradeUpdate {
                            filled_size: Some(report.filled_size.min(trade.size)),
                            average_price: report.average_price,
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(
                    trade_id = %filled.id,
                    order_id = %order_id,
                    filled_size = %filled.filled_size,
                    average_price = %filled.entry_price(),
                    "Trade filled"
                );
                if filled.is_stop_loss() {
                    self.settle_stop_loss(&filled).await?;
                    return Ok(None);
                }
                Ok(Some(filled))
            }
            OrderStatus::Cancelled | OrderStatus::Rejected => {
                self.store
                    .update_trade_status(trade.id, TradeStatus::Cancelled, TradeUpdate::default())
                    .await?;
                info!(trade_id = %trade.id, order_id = %order_id, status = ?report.status, "Order closed without fill");
                Ok(None)
            }
            OrderStatus::PartiallyFilled => {
                let updated = self
                    .store
                    .update_trade_status(
                        trade.id,
                        trade.status,
                        TradeUpdate {
                            filled_size: Some(report.filled_size.min(trade.size)),
                            average_price: report.average_price,
                            ..Default::default()
                        },
                    )
                    .await?;
                debug!(trade_id = %trade.id, filled_size = %updated.filled_size, "Order partially filled");
                Ok(Some(updated))
            }
            OrderStatus::Open => Ok(Some(trade)),
        }
    }

    /// A filled stop-loss closes its original trade at the stop's price.
    ///
    /// The loss is booked on the original; the stop itself resolves flat so
    /// it is counted once.
    async fn settle_stop_loss(&self, stop: &Trade) -> Result<()> {
        if let Some(original_id) = stop.stop_loss_for {
            match self.store.get_trade(original_id).await? {
                Some(original) if original.status.is_active() => {
                    let exit_price = stop.entry_price();
                    let pnl = original.exit_pnl(exit_price);
                    self.store
                        .update_trade_status(
                            original.id,
                            TradeStatus::Resolved,
                            TradeUpdate {
                                realized_pnl: Some(pnl),
                                unrealized_pnl: Some(Decimal::ZERO),
                                ..Default::default()
                            },
                        )
                        .await?;
                    warn!(
                        trade_id = %original.id,
                        stop_trade_id = %stop.id,
                        exit_price = %exit_price,
                        realized_pnl = %pnl,
                        "Position closed by stop-loss"
                    );
                }
                _ => warn!(
                    stop_trade_id = %stop.id,
                    original_id = %original_id,
                    "Stop-loss filled after original trade closed"
                ),
            }
        }

        self.store
            .update_trade_status(
                stop.id,
                TradeStatus::Resolved,
                TradeUpdate {
                    realized_pnl: Some(Decimal::ZERO),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn cached_market(&self, market_id: &str, markets: &mut MarketCache) -> Result<Option<Market>> {
        if let Some(market) = markets.get(market_id) {
            return Ok(market.clone());
        }
        let market = self.market_data.get_market(market_id).await?;
        markets.insert(market_id.to_string(), market.clone());
        Ok(market)
    }

    /// Settle a trade whose market has resolved. Returns whether it was closed.
    async fn settle_if_resolved(&self, trade: &Trade, markets: &mut MarketCache) -> Result<bool> {
        let Some(market) = self.cached_market(&trade.market_id, markets).await? else {
            return Ok(false);
        };
        if market.resolved && market.winning_outcome.is_none() {
            warn!(market_id = %market.id, "Market resolved without a winning outcome");
            return Ok(false);
        }
        let Some(won) = market.is_winner(&trade.outcome, &trade.token_id) else {
            return Ok(false);
        };

        if trade.is_stop_loss() {
            // The market settled first; the original trade settles on its own.
            if let Some(order_id) = &trade.external_id {
                self.executor
                    .cancel_order(order_id)
                    .await
                    .context("failed to cancel stop-loss order at resolution")?;
            }
            self.store
                .update_trade_status(trade.id, TradeStatus::Cancelled, TradeUpdate::default())
                .await?;
            info!(trade_id = %trade.id, market_id = %market.id, "Unfilled stop-loss cancelled at resolution");
            return Ok(true);
        }

        let payout = if won { Decimal::ONE } else { Decimal::ZERO };
        let pnl = trade.settlement_pnl(payout);
        self.store
            .update_trade_status(
                trade.id,
                TradeStatus::Resolved,
                TradeUpdate {
                    realized_pnl: Some(pnl),
                    unrealized_pnl: Some(Decimal::ZERO),
                    ..Default::default()
                },
            )
            .await?;
        info!(
            trade_id = %trade.id,
            market_id = %market.id,
            outcome = %trade.outcome,
            won,
            realized_pnl = %pnl,
            "Trade resolved"
        );

        if trade.side == OrderSide::Buy {
            match self.execution.redeem(&trade.token_id, payout).await {
                Ok(credited) => debug!(token_id = %trade.token_id, credited = %credited, "Position redeemed"),
                Err(e) => warn!(token_id = %trade.token_id, error = %e, "Redemption failed"),
            }
        }
        Ok(true)
    }

    /// Refresh unrealized P&L and close the position if the risk engine says so.
    async fn check_stop_loss(&self, trade: Trade) -> Result<()> {
        let Some(book) = self.market_data.get_order_book(&trade.token_id).await? else {
            debug!(trade_id = %trade.id, token_id = %trade.token_id, "No order book for position");
            return Ok(());
        };
        let Some(quote) = PriceQuote::from_book(&trade.outcome, &book) else {
            debug!(trade_id = %trade.id, "Order book is one-sided, position not marked");
            return Ok(());
        };

        let unrealized = trade.exit_pnl(quote.mid_price);
        let trade = self
            .store
            .update_trade_status(
                trade.id,
                trade.status,
                TradeUpdate {
                    unrealized_pnl: Some(unrealized),
                    ..Default::default()
                },
            )
            .await?;

        let probability = position_probability(&trade, quote.mid_price);
        if !self.risk.should_stop_loss(&trade, probability).await {
            return Ok(());
        }

        if let Some(existing) = self.store.find_stop_loss_for(trade.id).await? {
            debug!(trade_id = %trade.id, stop_trade_id = %existing.id, "Stop-loss already working");
            return Ok(());
        }
        self.execute_stop_loss(&trade, &quote).await
    }

    pub(crate) async fn execute_stop_loss(&self, trade: &Trade, quote: &PriceQuote) -> Result<()> {
        let offset = self.config().await.stop_loss_price_offset;
        let side = trade.side.opposite();
        let price = stop_loss_price(side, quote, offset);
        let size = trade.effective_size();

        warn!(
            trade_id = %trade.id,
            side = %side,
            size = %size,
            price = %price,
            mid_price = %quote.mid_price,
            "Executing stop-loss"
        );

        let stop = self
            .store
            .create_trade(NewTrade {
                market_id: trade.market_id.clone(),
                token_id: trade.token_id.clone(),
                outcome: trade.outcome.clone(),
                trade_type: trade.trade_type,
                side,
                size,
                price,
                status: TradeStatus::Pending,
                external_id: None,
                strategy_data: serde_json::json!({
                    "stop_loss_for": trade.id,
                    "trigger_mid_price": quote.mid_price,
                }),
                expected_probability: None,
                expected_return_pct: None,
                stop_loss_for: Some(trade.id),
                risk_score: trade.risk_score,
            })
            .await
            .context("failed to persist stop-loss trade")?;

        let order = OrderRequest::new(&trade.market_id, &trade.token_id, side, size, price);
        match self.executor.place_order(&order).await {
            Ok(Some(order_id)) => {
                self.store
                    .update_trade_status(
                        stop.id,
                        TradeStatus::Executed,
                        TradeUpdate {
                            external_id: Some(order_id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.store
                    .update_trade_status(
                        trade.id,
                        trade.status,
                        TradeUpdate {
                            stop_loss_price: Some(price),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(trade_id = %trade.id, stop_trade_id = %stop.id, order_id = %order_id, "Stop-loss order placed");
            }
            Ok(None) => {
                error!(trade_id = %trade.id, "Stop-loss order not accepted");
                self.fail_trade(stop.id).await;
            }
            Err(e) => {
                error!(trade_id = %trade.id, error = %e, "Stop-loss order failed");
                self.fail_trade(stop.id).await;
            }
        }
        Ok(())
    }
}

/// Probability that the held position pays out: the mid for a BUY, its
/// complement for a SELL.
fn position_probability(trade: &Trade, mid_price: Decimal) -> Decimal {
    match trade.side {
        OrderSide::Buy => mid_price,
        OrderSide::Sell => Decimal::ONE - mid_price,
    }
}
