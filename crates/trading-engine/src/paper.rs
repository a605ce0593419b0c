//! Simulated exchange for paper trading.
//!
//! Orders fill immediately at their limit price against a virtual cash
//! balance. Settled positions are redeemed back into cash.

use async_trait::async_trait;
use dashmap::DashMap;
use polymarket_core::providers::HealthStatus;
use polymarket_core::types::{
    OrderRequest, OrderSide, OrderStatus, OrderStatusReport, TokenBalance,
};
use polymarket_core::{ExecutionProvider, Result};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Holding {
    market_id: String,
    shares: Decimal,
}

pub struct PaperExchange {
    cash: RwLock<Decimal>,
    holdings: DashMap<String, Holding>,
    orders: DashMap<String, OrderStatusReport>,
}

impl PaperExchange {
    pub fn new(starting_balance: Decimal) -> Self {
        info!(starting_balance = %starting_balance, "[PAPER] Exchange initialized");
        Self {
            cash: RwLock::new(starting_balance),
            holdings: DashMap::new(),
            orders: DashMap::new(),
        }
    }

    /// Shares held of a token.
    pub fn position(&self, token_id: &str) -> Decimal {
        self.holdings
            .get(token_id)
            .map(|h| h.shares)
            .unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl ExecutionProvider for PaperExchange {
    async fn place_order(&self, order: &OrderRequest) -> Result<Option<String>> {
        order.validate()?;
        let notional = order.notional();
        let mut cash = self.cash.write().await;

        match order.side {
            OrderSide::Buy => {
                if notional > *cash {
                    warn!(
                        token_id = %order.token_id,
                        notional = %notional,
                        cash = %*cash,
                        "[PAPER] Insufficient cash, order not accepted"
                    );
                    return Ok(None);
                }
                *cash -= notional;
                self.holdings
                    .entry(order.token_id.clone())
                    .or_insert_with(|| Holding {
                        market_id: order.market_id.clone(),
                        shares: Decimal::ZERO,
                    })
                    .shares += order.size;
            }
            OrderSide::Sell => {
                let held = self.position(&order.token_id);
                if held < order.size {
                    warn!(
                        token_id = %order.token_id,
                        size = %order.size,
                        held = %held,
                        "[PAPER] Insufficient shares, order not accepted"
                    );
                    return Ok(None);
                }
                if let Some(mut holding) = self.holdings.get_mut(&order.token_id) {
                    holding.shares -= order.size;
                }
                *cash += notional;
            }
        }

        let order_id = format!("paper-{}", Uuid::new_v4());
        self.orders.insert(
            order_id.clone(),
            OrderStatusReport {
                order_id: order_id.clone(),
                status: OrderStatus::Filled,
                filled_size: order.size,
                remaining_size: Decimal::ZERO,
                average_price: Some(order.price),
            },
        );
        info!(
            order_id = %order_id,
            side = %order.side,
            size = %order.size,
            price = %order.price,
            cash = %*cash,
            "[PAPER] Order filled"
        );
        Ok(Some(order_id))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        // Paper orders fill on placement; nothing is ever left to cancel.
        debug!(order_id = %order_id, "[PAPER] Cancel requested for filled order");
        Ok(false)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<Option<OrderStatusReport>> {
        Ok(self.orders.get(order_id).map(|r| r.clone()))
    }

    async fn get_balances(&self) -> Result<Vec<TokenBalance>> {
        Ok(self
            .holdings
            .iter()
            .filter(|h| h.shares > Decimal::ZERO)
            .map(|h| TokenBalance {
                token_id: h.key().clone(),
                balance: h.shares,
                market_id: Some(h.market_id.clone()),
                outcome: None,
            })
            .collect())
    }

    async fn get_cash_balance(&self) -> Result<Decimal> {
        Ok(*self.cash.read().await)
    }

    async fn redeem(&self, token_id: &str, payout: Decimal) -> Result<Decimal> {
        let Some((_, holding)) = self.holdings.remove(token_id) else {
            return Ok(Decimal::ZERO);
        };
        let credited = holding.shares * payout;
        *self.cash.write().await += credited;
        info!(
            token_id = %token_id,
            shares = %holding.shares,
            credited = %credited,
            "[PAPER] Position redeemed"
        );
        Ok(credited)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(side: OrderSide, size: i64, price_cents: i64) -> OrderRequest {
        OrderRequest::new(
            "m1",
            "m1-yes",
            side,
            Decimal::new(size, 0),
            Decimal::new(price_cents, 2),
        )
    }

    #[tokio::test]
    async fn test_buy_then_sell_moves_cash() {
        let exchange = PaperExchange::new(Decimal::new(100, 0));

        let order_id = exchange
            .place_order(&order(OrderSide::Buy, 50, 96))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exchange.get_cash_balance().await.unwrap(), Decimal::new(52, 0));
        assert_eq!(exchange.position("m1-yes"), Decimal::new(50, 0));

        let report = exchange.get_order_status(&order_id).await.unwrap().unwrap();
        assert_eq!(report.status, OrderStatus::Filled);

        exchange
            .place_order(&order(OrderSide::Sell, 50, 80))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exchange.get_cash_balance().await.unwrap(), Decimal::new(92, 0));
        assert_eq!(exchange.position("m1-yes"), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unfunded_orders_not_accepted() {
        let exchange = PaperExchange::new(Decimal::new(10, 0));

        assert!(exchange
            .place_order(&order(OrderSide::Buy, 50, 96))
            .await
            .unwrap()
            .is_none());
        assert!(exchange
            .place_order(&order(OrderSide::Sell, 1, 50))
            .await
            .unwrap()
            .is_none());
        assert_eq!(exchange.get_cash_balance().await.unwrap(), Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn test_redeem_credits_payout() {
        let exchange = PaperExchange::new(Decimal::new(100, 0));
        exchange
            .place_order(&order(OrderSide::Buy, 50, 96))
            .await
            .unwrap();

        let credited = exchange.redeem("m1-yes", Decimal::ONE).await.unwrap();
        assert_eq!(credited, Decimal::new(50, 0));
        assert_eq!(exchange.get_cash_balance().await.unwrap(), Decimal::new(102, 0));
        assert!(exchange.get_balances().await.unwrap().is_empty());
        assert_eq!(exchange.redeem("m1-yes", Decimal::ONE).await.unwrap(), Decimal::ZERO);
    }
}
