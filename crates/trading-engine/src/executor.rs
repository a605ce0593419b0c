//! Order submission with dry-run support and outstanding-order tracking.

use anyhow::{Context, Result};
use dashmap::DashMap;
use polymarket_core::types::{OrderRequest, OrderStatus, OrderStatusReport};
pub use polymarket_core::types::DRY_RUN_PREFIX;
use polymarket_core::ExecutionProvider;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counters for order submission.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub orders_submitted: u64,
    pub orders_accepted: u64,
    pub orders_rejected: u64,
    pub orders_cancelled: u64,
    /// Notional of accepted orders.
    pub total_volume: Decimal,
}

/// Places orders through an execution provider, or simulates them in dry run.
pub struct OrderExecutor {
    execution: Arc<dyn ExecutionProvider>,
    dry_run: AtomicBool,
    /// Live orders not yet known to be terminal, by exchange order id.
    active_orders: DashMap<String, OrderRequest>,
    /// Synthetic fills issued in dry run.
    dry_run_orders: DashMap<String, OrderStatusReport>,
    metrics: std::sync::RwLock<ExecutionMetrics>,
}

impl OrderExecutor {
    pub fn new(execution: Arc<dyn ExecutionProvider>, dry_run: bool) -> Self {
        if dry_run {
            info!("Order executor in dry-run mode, no orders reach the exchange");
        }
        Self {
            execution,
            dry_run: AtomicBool::new(dry_run),
            active_orders: DashMap::new(),
            dry_run_orders: DashMap::new(),
            metrics: std::sync::RwLock::new(ExecutionMetrics::default()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run.load(Ordering::SeqCst)
    }

    pub fn set_dry_run(&self, dry_run: bool) {
        self.dry_run.store(dry_run, Ordering::SeqCst);
    }

    /// Submit an order.
    ///
    /// Invalid orders are rejected with an error before anything is sent.
    /// Returns the order id, or `None` when the exchange did not accept it.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<Option<String>> {
        order.validate()?;

        info!(
            market_id = %order.market_id,
            token_id = %order.token_id,
            side = %order.side,
            size = %order.size,
            price = %order.price,
            dry_run = self.is_dry_run(),
            "Placing order"
        );

        let result = if self.is_dry_run() {
            let order_id = format!("{}{}", DRY_RUN_PREFIX, Uuid::new_v4());
            self.dry_run_orders.insert(
                order_id.clone(),
                OrderStatusReport {
                    order_id: order_id.clone(),
                    status: OrderStatus::Filled,
                    filled_size: order.size,
                    remaining_size: Decimal::ZERO,
                    average_price: Some(order.price),
                },
            );
            Ok(Some(order_id))
        } else {
            self.execution
                .place_order(order)
                .await
                .context("order placement failed")
        };

        self.record(order, &result);
        if let Ok(Some(order_id)) = &result {
            if !self.is_dry_run() {
                self.active_orders.insert(order_id.clone(), order.clone());
            }
        }
        result
    }

    fn record(&self, order: &OrderRequest, result: &Result<Option<String>>) {
        let Ok(mut metrics) = self.metrics.write() else {
            return;
        };
        metrics.orders_submitted += 1;
        match result {
            Ok(Some(_)) => {
                metrics.orders_accepted += 1;
                metrics.total_volume += order.notional();
            }
            _ => metrics.orders_rejected += 1,
        }
    }

    /// Latest status of an order. Terminal live orders stop being tracked.
    pub async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatusReport>> {
        if let Some(report) = self.dry_run_orders.get(order_id) {
            return Ok(Some(report.clone()));
        }
        if order_id.starts_with(DRY_RUN_PREFIX) {
            return Ok(None);
        }

        let report = self
            .execution
            .get_order_status(order_id)
            .await
            .context("order status lookup failed")?;
        if let Some(report) = &report {
            if matches!(
                report.status,
                OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
            ) {
                self.active_orders.remove(order_id);
            }
        }
        Ok(report)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        if order_id.starts_with(DRY_RUN_PREFIX) {
            return Ok(false);
        }
        let cancelled = self
            .execution
            .cancel_order(order_id)
            .await
            .context("order cancellation failed")?;
        if cancelled {
            self.active_orders.remove(order_id);
            if let Ok(mut metrics) = self.metrics.write() {
                metrics.orders_cancelled += 1;
            }
            info!(order_id = %order_id, "Order cancelled");
        } else {
            warn!(order_id = %order_id, "Order could not be cancelled");
        }
        Ok(cancelled)
    }

    /// Cancel every outstanding live order. Returns how many were cancelled.
    ///
    /// Individual failures are logged and the order stays tracked.
    pub async fn cancel_all(&self) -> usize {
        let order_ids: Vec<String> = self
            .active_orders
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        if order_ids.is_empty() {
            return 0;
        }

        let mut cancelled = 0;
        for order_id in &order_ids {
            match self.cancel_order(order_id).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => warn!(order_id = %order_id, error = %e, "Cancel failed"),
            }
        }
        info!(cancelled, outstanding = order_ids.len(), "Cancelled outstanding orders");
        cancelled
    }

    /// Live orders not yet known to be terminal.
    pub fn outstanding_orders(&self) -> usize {
        self.active_orders.len()
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        match self.metrics.read() {
            Ok(metrics) => metrics.clone(),
            Err(poisoned) => {
                debug!("Execution metrics lock poisoned");
                poisoned.into_inner().clone()
            }
        }
    }
}
