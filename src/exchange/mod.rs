// =============================================================================
// Exchange Port — the boundary every order and snapshot crosses
// =============================================================================
//
// The engine only ever talks to `dyn ExchangePort`. Adapters (live REST,
// paper simulator) translate their transport into the typed error kinds and
// guarantee at-most-once submission per `OrderRequest.client_id`; the caller
// never retries `submit_order` automatically.
// =============================================================================

pub mod paper;
pub mod rest;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ExchangeError;
use crate::market::{Market, OrderBook};
use crate::types::{OrderType, Side};

/// One open position, keyed by ticker. Positive quantity holds YES
/// contracts, negative holds NO contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub quantity: i64,
    /// Average entry price in cents of the held side.
    pub entry_price: u32,
    /// Latest mark in cents of the held side.
    pub current_price: u32,
    /// Mark-to-market gain in cents.
    pub unrealized_pnl: i64,
}

impl Position {
    pub fn side(&self) -> Side {
        if self.quantity >= 0 {
            Side::Yes
        } else {
            Side::No
        }
    }

    /// Current notional exposure in cents.
    pub fn exposure(&self) -> i64 {
        self.quantity.abs() * self.current_price as i64
    }
}

/// Account state as of one portfolio refresh. All amounts in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: i64,
    /// cash + Σ mark-to-market of open positions.
    pub equity: i64,
    pub daily_pnl: i64,
    pub positions: HashMap<String, Position>,
    /// Highest equity seen; filled in by the performance tracker.
    #[serde(default)]
    pub peak_equity: i64,
    /// Relative decline from peak equity, in percent.
    #[serde(default)]
    pub drawdown_pct: f64,
}

impl PortfolioSnapshot {
    /// Today's P&L as a percentage of start-of-day equity.
    pub fn daily_pnl_pct(&self) -> f64 {
        let start_of_day = self.equity - self.daily_pnl;
        if start_of_day <= 0 {
            return 0.0;
        }
        self.daily_pnl as f64 / start_of_day as f64 * 100.0
    }
}

/// A single order submission. `client_id` makes the attempt idempotent at
/// the adapter: resubmitting the same id must not create a second order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: Side,
    /// Limit price in cents, 1..=99.
    pub price: u32,
    pub quantity: u32,
    pub order_type: OrderType,
    pub client_id: String,
}

/// Exchange-reported outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    Partial,
    Rejected,
}

/// Receipt returned by a successful `submit_order` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub status: OrderStatus,
    /// Average fill price in cents; meaningless when nothing filled.
    pub fill_price: u32,
    pub fill_qty: u32,
}

/// Capability set the engine requires from an exchange.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// List open markets, best-ranked first (by volume where the venue
    /// supports it), at most `limit` entries.
    async fn list_open_markets(&self, limit: usize) -> Result<Vec<Market>, ExchangeError>;

    /// Top-of-book snapshot, or `None` when the ticker is unknown or the
    /// market no longer trades.
    async fn get_order_book(&self, ticker: &str) -> Result<Option<OrderBook>, ExchangeError>;

    async fn get_portfolio(&self) -> Result<PortfolioSnapshot, ExchangeError>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt, ExchangeError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_side_follows_quantity_sign() {
        let yes = Position {
            ticker: "T".into(),
            quantity: 10,
            entry_price: 40,
            current_price: 45,
            unrealized_pnl: 50,
        };
        assert_eq!(yes.side(), Side::Yes);
        assert_eq!(yes.exposure(), 450);

        let no = Position {
            quantity: -10,
            ..yes
        };
        assert_eq!(no.side(), Side::No);
        assert_eq!(no.exposure(), 450);
    }

    #[test]
    fn daily_pnl_pct_uses_start_of_day_equity() {
        let p = PortfolioSnapshot {
            cash: 90_000,
            equity: 90_000,
            daily_pnl: -10_000,
            positions: HashMap::new(),
            peak_equity: 0,
            drawdown_pct: 0.0,
        };
        // Start-of-day equity 100 000; lost 10 000 → -10%.
        assert!((p.daily_pnl_pct() + 10.0).abs() < 1e-9);
    }
}
