// =============================================================================
// Executor — price-impact adjustment, submission, slippage accounting
// =============================================================================
//
// Takes the single risk-approved opportunity for the cycle and submits it as
// a limit order, paying up by the expected impact learned from recent fills
// on the same ticker and side. Every fill is folded back into the impact
// history; every outcome is reported with latency and slippage.
//
// Failure policy: nothing is retried inside a cycle. Rate limiting doubles a
// backoff (capped at 30 s) that stretches the next cycle; a successful
// submission clears it. Partially filled orders rest at the venue and are
// cancelled at the start of the next cycle if still unfilled.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{EngineError, ExchangeError};
use crate::exchange::{ExchangePort, OrderRequest, OrderStatus};
use crate::market::OrderBook;
use crate::performance::TradeOutcome;
use crate::strategy::MarketOpportunity;
use crate::types::{OrderType, Side};

/// Fills remembered per ticker-side for impact estimation.
const IMPACT_WINDOW: usize = 20;
/// Offset applied when no fill history exists, in cents.
const IMPACT_DEFAULT_CENTS: f64 = 0.5;
/// Impact offset clamp, in cents.
const IMPACT_MAX_CENTS: f64 = 2.0;

/// Backoff bounds applied on rate limiting.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Where an order attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Filled,
    Partial,
    Rejected,
}

/// Everything the scheduler needs to report one execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub order_id: String,
    pub state: OrderState,
    pub fill_price: u32,
    pub fill_qty: u32,
    pub latency_ms: u64,
    pub slippage_pct: f64,
    /// Present when anything actually filled.
    pub outcome: Option<TradeOutcome>,
}

#[derive(Debug, Clone)]
struct PendingOrder {
    order_id: String,
    ticker: String,
}

/// Order submission with impact and latency accounting.
pub struct Executor {
    exchange: Arc<dyn ExchangePort>,
    order_deadline: Duration,
    /// Recent per-fill impact in cents, keyed by ticker and side.
    impact_history: HashMap<(String, Side), VecDeque<f64>>,
    /// Resting remainders to cancel next cycle.
    pending: Vec<PendingOrder>,
    backoff: Duration,
}

impl Executor {
    pub fn new(exchange: Arc<dyn ExchangePort>, order_deadline: Duration) -> Self {
        Self {
            exchange,
            order_deadline,
            impact_history: HashMap::new(),
            pending: Vec::new(),
            backoff: Duration::ZERO,
        }
    }

    /// Current rate-limit backoff; added to the next cycle's sleep.
    pub fn current_backoff(&self) -> Duration {
        self.backoff
    }

    /// Expected impact in cents for a ticker-side, from the mean of the last
    /// [`IMPACT_WINDOW`] fills.
    fn impact_offset(&self, ticker: &str, side: Side) -> f64 {
        match self.impact_history.get(&(ticker.to_string(), side)) {
            Some(history) if !history.is_empty() => {
                let mean = history.iter().sum::<f64>() / history.len() as f64;
                mean.clamp(0.0, IMPACT_MAX_CENTS)
            }
            _ => IMPACT_DEFAULT_CENTS,
        }
    }

    fn record_impact(&mut self, ticker: &str, side: Side, slippage_pct: f64, entry_price: u32) {
        let cents = slippage_pct / 100.0 * entry_price as f64;
        let history = self
            .impact_history
            .entry((ticker.to_string(), side))
            .or_default();
        history.push_back(cents);
        while history.len() > IMPACT_WINDOW {
            history.pop_front();
        }
    }

    /// Cancel resting remainders left over from the previous cycle. Called
    /// at cycle start so partials get one interval to fill on their own.
    pub async fn cancel_stale(&mut self) {
        let stale = std::mem::take(&mut self.pending);
        for order in stale {
            match self.exchange.cancel_order(&order.order_id).await {
                Ok(()) => {
                    info!(order_id = %order.order_id, ticker = %order.ticker, "stale resting order cancelled");
                }
                Err(ExchangeError::Permanent(_)) => {
                    // Already filled or gone; nothing resting to cancel.
                    debug!(order_id = %order.order_id, "stale order already gone");
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "stale order cancel failed");
                }
            }
        }
    }

    /// Submission path shared by `execute` and `flatten`: deadline, rate
    /// limit backoff, latency capture.
    async fn submit_with_deadline(
        &mut self,
        request: &OrderRequest,
    ) -> Result<(crate::exchange::OrderReceipt, u64), EngineError> {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.order_deadline,
            self.exchange.submit_order(request),
        )
        .await;

        let receipt = match result {
            Err(_) => {
                // The attempt is abandoned at the deadline; at-most-once
                // semantics forbid a blind resubmit.
                warn!(ticker = %request.ticker, "order submission timed out");
                return Err(EngineError::from(ExchangeError::DeadlineExceeded {
                    operation: "submit_order",
                    deadline_ms: self.order_deadline.as_millis() as u64,
                }));
            }
            Ok(Err(e)) => {
                if let ExchangeError::RateLimited { .. } = e {
                    self.backoff = (self.backoff * 2).clamp(BACKOFF_BASE, BACKOFF_MAX);
                    warn!(backoff_s = self.backoff.as_secs(), "rate limited — backoff extended");
                }
                return Err(EngineError::from(e));
            }
            Ok(Ok(receipt)) => receipt,
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        self.backoff = Duration::ZERO;
        Ok((receipt, latency_ms))
    }

    /// Submit one approved opportunity.
    ///
    /// `book` is the snapshot the opportunity came from; fills are marked
    /// out against its mid to realize an immediate P&L estimate.
    pub async fn execute(
        &mut self,
        opportunity: &MarketOpportunity,
        book: &OrderBook,
    ) -> Result<ExecutionReport, EngineError> {
        let offset = self.impact_offset(&opportunity.ticker, opportunity.side);
        let adjusted_price = ((opportunity.entry_price as f64 + offset).round() as u32).clamp(1, 99);

        let request = OrderRequest {
            ticker: opportunity.ticker.clone(),
            side: opportunity.side,
            price: adjusted_price,
            quantity: opportunity.suggested_size,
            order_type: OrderType::Limit,
            client_id: Uuid::new_v4().to_string(),
        };

        debug!(
            ticker = %request.ticker,
            side = %request.side,
            entry_price = opportunity.entry_price,
            adjusted_price,
            qty = request.quantity,
            impact_offset = offset,
            "submitting order"
        );

        let (receipt, latency_ms) = self.submit_with_deadline(&request).await?;

        if receipt.status == OrderStatus::Rejected {
            warn!(ticker = %request.ticker, order_id = %receipt.order_id, "order rejected by venue");
            return Ok(ExecutionReport {
                order_id: receipt.order_id,
                state: OrderState::Rejected,
                fill_price: 0,
                fill_qty: 0,
                latency_ms,
                slippage_pct: 0.0,
                outcome: None,
            });
        }

        if receipt.status == OrderStatus::Partial {
            // Leave the remainder resting for one interval.
            self.pending.push(PendingOrder {
                order_id: receipt.order_id.clone(),
                ticker: request.ticker.clone(),
            });
        }

        if receipt.fill_qty == 0 {
            debug!(order_id = %receipt.order_id, "order resting with no fill yet");
            return Ok(ExecutionReport {
                order_id: receipt.order_id,
                state: OrderState::Partial,
                fill_price: 0,
                fill_qty: 0,
                latency_ms,
                slippage_pct: 0.0,
                outcome: None,
            });
        }

        // Slippage against the intended entry; favorable fills are negative.
        let slippage_pct = (receipt.fill_price as f64 - opportunity.entry_price as f64)
            / opportunity.entry_price as f64
            * 100.0;
        self.record_impact(
            &opportunity.ticker,
            opportunity.side,
            slippage_pct,
            opportunity.entry_price,
        );

        // Immediate mark-out against the snapshot mid stands in for realized
        // P&L until settlement.
        let mark = book
            .mid(opportunity.side)
            .map(|m| m.round() as i64)
            .unwrap_or(opportunity.entry_price as i64);
        let realized_pnl = (mark - receipt.fill_price as i64) * receipt.fill_qty as i64;

        let outcome = TradeOutcome {
            ticker: opportunity.ticker.clone(),
            strategy: opportunity.strategy,
            side: opportunity.side,
            edge: opportunity.edge,
            realized_pnl,
            latency_ms,
            slippage_pct,
            timestamp: Utc::now().to_rfc3339(),
        };

        info!(
            ticker = %opportunity.ticker,
            side = %opportunity.side,
            order_id = %receipt.order_id,
            fill_price = receipt.fill_price,
            fill_qty = receipt.fill_qty,
            latency_ms,
            slippage_pct,
            "order executed"
        );

        let state = match receipt.status {
            OrderStatus::Filled => OrderState::Filled,
            _ => OrderState::Partial,
        };

        Ok(ExecutionReport {
            order_id: receipt.order_id,
            state,
            fill_price: receipt.fill_price,
            fill_qty: receipt.fill_qty,
            latency_ms,
            slippage_pct,
            outcome: Some(outcome),
        })
    }

    /// Flatten an existing position by crossing the opposite side of its
    /// book. No impact adjustment and no outcome accounting; the close shows
    /// up in the next portfolio refresh.
    pub async fn flatten(
        &mut self,
        ticker: &str,
        side: Side,
        price: u32,
        quantity: u32,
    ) -> Result<ExecutionReport, EngineError> {
        let request = OrderRequest {
            ticker: ticker.to_string(),
            side,
            price,
            quantity,
            order_type: OrderType::Limit,
            client_id: Uuid::new_v4().to_string(),
        };

        info!(ticker, side = %side, price, quantity, "flattening position");
        let (receipt, latency_ms) = self.submit_with_deadline(&request).await?;

        if receipt.status == OrderStatus::Partial {
            self.pending.push(PendingOrder {
                order_id: receipt.order_id.clone(),
                ticker: request.ticker.clone(),
            });
        }

        let state = match receipt.status {
            OrderStatus::Filled => OrderState::Filled,
            OrderStatus::Partial => OrderState::Partial,
            OrderStatus::Rejected => OrderState::Rejected,
        };

        Ok(ExecutionReport {
            order_id: receipt.order_id,
            state,
            fill_price: receipt.fill_price,
            fill_qty: receipt.fill_qty,
            latency_ms,
            slippage_pct: 0.0,
            outcome: None,
        })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("order_deadline", &self.order_deadline)
            .field("pending", &self.pending.len())
            .field("backoff", &self.backoff)
            .finish()
    }
}
