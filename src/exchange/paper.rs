// =============================================================================
// Paper Exchange — deterministic in-process simulator
// =============================================================================
//
// Replaces the live venue in paper mode. Fill rule: a limit buy fills
// instantly iff its price crosses the resting ask, at the ask plus 5 bps
// slippage, up to the displayed top-of-book size. Anything that does not
// cross rests until cancelled. No randomness anywhere, so tests can assert
// exact fills.
//
// YES and NO inventory in the same ticker nets out: each matched pair
// redeems the 100-cent contract notional into cash.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::ExchangeError;
use crate::exchange::{
    ExchangePort, OrderReceipt, OrderRequest, OrderStatus, PortfolioSnapshot, Position,
};
use crate::market::{Level, Market, OrderBook, ScannedMarket};
use crate::types::{MarketStatus, OrderType, Side};

/// Slippage applied to every simulated fill, in basis points of price.
const SLIPPAGE_BPS: f64 = 5.0;

#[derive(Debug, Clone)]
struct RestingOrder {
    ticker: String,
    side: Side,
    price: u32,
    remaining: u32,
}

#[derive(Debug, Default)]
struct PaperState {
    cash: i64,
    positions: HashMap<String, Position>,
    start_of_day_equity: i64,
    current_date: String,
    markets: Vec<Market>,
    books: HashMap<String, OrderBook>,
    /// client_id → receipt already issued, for at-most-once submission.
    submitted: HashMap<String, OrderReceipt>,
    resting: HashMap<String, RestingOrder>,
}

/// Deterministic paper-trading venue.
pub struct PaperExchange {
    state: RwLock<PaperState>,
}

impl PaperExchange {
    /// Create an empty venue with `cash` cents of buying power.
    pub fn new(cash: i64) -> Self {
        let state = PaperState {
            cash,
            start_of_day_equity: cash,
            current_date: Utc::now().format("%Y-%m-%d").to_string(),
            ..PaperState::default()
        };
        info!(cash, "paper exchange initialised");
        Self {
            state: RwLock::new(state),
        }
    }

    /// Create a venue pre-seeded with a market universe.
    pub fn with_universe(cash: i64, universe: Vec<ScannedMarket>) -> Self {
        let venue = Self::new(cash);
        {
            let mut s = venue.state.write();
            for scanned in universe {
                s.books
                    .insert(scanned.market.ticker.clone(), scanned.book);
                s.markets.push(scanned.market);
            }
        }
        venue
    }

    /// A small plausible universe so a fresh paper boot has something to
    /// scan.
    pub fn with_demo_universe(cash: i64) -> Self {
        let mk = |ticker: &str, title: &str, volume, oi, yb, ya, nb, na| ScannedMarket {
            market: Market {
                ticker: ticker.to_string(),
                title: title.to_string(),
                status: MarketStatus::Open,
                volume,
                open_interest: oi,
            },
            book: OrderBook {
                ticker: ticker.to_string(),
                yes_bid: Some(Level::new(yb, 400)),
                yes_ask: Some(Level::new(ya, 400)),
                no_bid: Some(Level::new(nb, 400)),
                no_ask: Some(Level::new(na, 400)),
            },
        };
        Self::with_universe(
            cash,
            vec![
                mk("BTC-100K-DEC", "Will BTC trade above 100K in December?", 48_000, 9_200, 46, 48, 50, 52),
                mk("ETH-5K-DEC", "Will ETH trade above 5K in December?", 31_000, 6_100, 33, 35, 63, 65),
                mk("FED-CUT-MAR", "Will the Fed cut rates in March?", 27_500, 5_400, 58, 60, 38, 40),
                mk("CPI-ABOVE-3", "Will CPI come in above 3 percent?", 18_200, 3_900, 22, 24, 74, 76),
                mk("NBA-FINALS-EAST", "Will the NBA finals go to the East?", 12_700, 2_800, 51, 53, 45, 47),
                mk("SENATE-2026", "Will the senate flip in the 2026 election?", 9_900, 2_100, 41, 43, 55, 57),
            ],
        )
    }

    /// Replace the book for one ticker (tests and data refresh).
    pub fn set_book(&self, book: OrderBook) {
        self.state.write().books.insert(book.ticker.clone(), book);
    }

    /// Replace the listed markets (tests).
    pub fn set_markets(&self, markets: Vec<Market>) {
        self.state.write().markets = markets;
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn maybe_reset_daily(s: &mut PaperState) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if s.current_date != today {
            let equity = Self::equity(s);
            debug!(old_date = %s.current_date, new_date = %today, "paper venue date rolled");
            s.current_date = today;
            s.start_of_day_equity = equity;
        }
    }

    /// Mark price in cents for the held side of a position.
    fn mark_for(s: &PaperState, pos: &Position) -> u32 {
        let book = match s.books.get(&pos.ticker) {
            Some(b) => b,
            None => return pos.entry_price,
        };
        let mid = match pos.side() {
            Side::Yes => book.yes_mid(),
            Side::No => book
                .no_mid()
                .or_else(|| book.yes_mid().map(|m| 100.0 - m)),
        };
        mid.map(|m| m.round() as u32).unwrap_or(pos.entry_price)
    }

    fn equity(s: &PaperState) -> i64 {
        let marked: i64 = s
            .positions
            .values()
            .map(|p| p.quantity.abs() * Self::mark_for(s, p) as i64)
            .sum();
        s.cash + marked
    }

    /// Apply a fill to cash and positions, netting opposite-side inventory.
    fn apply_fill(s: &mut PaperState, ticker: &str, side: Side, fill_price: u32, qty: u32) {
        let signed: i64 = match side {
            Side::Yes => qty as i64,
            Side::No => -(qty as i64),
        };
        s.cash -= qty as i64 * fill_price as i64;

        let pos = s.positions.entry(ticker.to_string()).or_insert(Position {
            ticker: ticker.to_string(),
            quantity: 0,
            entry_price: fill_price,
            current_price: fill_price,
            unrealized_pnl: 0,
        });

        if pos.quantity == 0 || pos.quantity.signum() == signed.signum() {
            // Same direction: weighted-average the entry.
            let old_notional = pos.quantity.abs() * pos.entry_price as i64;
            let new_notional = qty as i64 * fill_price as i64;
            let total = pos.quantity.abs() + qty as i64;
            pos.entry_price = ((old_notional + new_notional) / total.max(1)) as u32;
            pos.quantity += signed;
        } else {
            // Opposite direction: matched pairs redeem contract notional.
            let matched = pos.quantity.abs().min(qty as i64);
            s.cash += matched * 100;
            pos.quantity += signed;
            if pos.quantity.signum() == signed.signum() && pos.quantity != 0 {
                // Flipped through zero: the remainder opens at the new price.
                pos.entry_price = fill_price;
            }
        }
        pos.current_price = fill_price;

        if pos.quantity == 0 {
            s.positions.remove(ticker);
        }
    }
}

#[async_trait]
impl ExchangePort for PaperExchange {
    async fn list_open_markets(&self, limit: usize) -> Result<Vec<Market>, ExchangeError> {
        let s = self.state.read();
        let mut markets: Vec<Market> = s
            .markets
            .iter()
            .filter(|m| m.status == MarketStatus::Open)
            .cloned()
            .collect();
        markets.sort_by(|a, b| b.volume.cmp(&a.volume));
        markets.truncate(limit);
        Ok(markets)
    }

    async fn get_order_book(&self, ticker: &str) -> Result<Option<OrderBook>, ExchangeError> {
        Ok(self.state.read().books.get(ticker).cloned())
    }

    async fn get_portfolio(&self) -> Result<PortfolioSnapshot, ExchangeError> {
        let mut s = self.state.write();
        Self::maybe_reset_daily(&mut s);

        let mut positions = HashMap::new();
        let snapshot_marks: Vec<(String, u32)> = s
            .positions
            .values()
            .map(|p| (p.ticker.clone(), Self::mark_for(&s, p)))
            .collect();
        for (ticker, mark) in snapshot_marks {
            if let Some(p) = s.positions.get_mut(&ticker) {
                p.current_price = mark;
                // Marks are quoted on the held side, so the move times the
                // magnitude is already signed correctly.
                p.unrealized_pnl = p.quantity.abs() * (mark as i64 - p.entry_price as i64);
                positions.insert(ticker, p.clone());
            }
        }

        let equity = Self::equity(&s);
        Ok(PortfolioSnapshot {
            cash: s.cash,
            equity,
            daily_pnl: equity - s.start_of_day_equity,
            positions,
            peak_equity: equity,
            drawdown_pct: 0.0,
        })
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt, ExchangeError> {
        let mut s = self.state.write();
        Self::maybe_reset_daily(&mut s);

        // At-most-once per client id.
        if let Some(receipt) = s.submitted.get(&request.client_id) {
            return Ok(receipt.clone());
        }

        if request.quantity == 0 || !crate::market::is_tradeable_price(request.price) {
            return Err(ExchangeError::Permanent(format!(
                "invalid order: price={} qty={}",
                request.price, request.quantity
            )));
        }

        let book = s
            .books
            .get(&request.ticker)
            .cloned()
            .ok_or_else(|| ExchangeError::Permanent(format!("unknown ticker {}", request.ticker)))?;

        let ask = book.ask(request.side);
        let order_id = Uuid::new_v4().to_string();

        let crosses = match (request.order_type, ask) {
            (OrderType::Market, Some(_)) => true,
            (OrderType::Limit, Some(a)) => request.price >= a.price,
            (_, None) => false,
        };

        let receipt = if crosses {
            let a = ask.expect("crossing implies a resting ask");
            let fill_qty = request.quantity.min(a.size);
            let fill_price =
                ((a.price as f64 * (1.0 + SLIPPAGE_BPS / 10_000.0)).round() as u32).clamp(1, 99);

            Self::apply_fill(&mut s, &request.ticker, request.side, fill_price, fill_qty);

            let status = if fill_qty == request.quantity {
                OrderStatus::Filled
            } else {
                s.resting.insert(
                    order_id.clone(),
                    RestingOrder {
                        ticker: request.ticker.clone(),
                        side: request.side,
                        price: request.price,
                        remaining: request.quantity - fill_qty,
                    },
                );
                OrderStatus::Partial
            };

            debug!(
                ticker = %request.ticker,
                side = %request.side,
                fill_price,
                fill_qty,
                status = ?status,
                "paper fill"
            );

            OrderReceipt {
                order_id,
                status,
                fill_price,
                fill_qty,
            }
        } else {
            // Does not cross: rest the full quantity.
            s.resting.insert(
                order_id.clone(),
                RestingOrder {
                    ticker: request.ticker.clone(),
                    side: request.side,
                    price: request.price,
                    remaining: request.quantity,
                },
            );
            OrderReceipt {
                order_id,
                status: OrderStatus::Partial,
                fill_price: 0,
                fill_qty: 0,
            }
        };

        s.submitted.insert(request.client_id.clone(), receipt.clone());
        Ok(receipt)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let mut s = self.state.write();
        match s.resting.remove(order_id) {
            Some(order) => {
                debug!(
                    order_id,
                    ticker = %order.ticker,
                    side = %order.side,
                    price = order.price,
                    remaining = order.remaining,
                    "resting order cancelled"
                );
                Ok(())
            }
            None => Err(ExchangeError::Permanent(format!(
                "unknown order {order_id}"
            ))),
        }
    }
}
