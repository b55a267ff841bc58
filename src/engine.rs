// =============================================================================
// Cycle Scheduler — the single writer driving the trading pipeline
// =============================================================================
//
// One task owns every piece of mutable trading state: caches, risk
// parameters, performance, the executor's pending-order set. Each cycle:
//
//   observe portfolio → adapt risk params → scan → evaluate → risk gate
//   → reasoner decision (deadlined) → execute → report
//
// A circuit breaker halts everything past the portfolio read for the rest of
// the UTC day once the daily loss limit is hit. Rate-limit backoff from the
// executor stretches the gap to the next cycle. Observers see only copies,
// via the event bus and the shared snapshot.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::app_state::{AppState, CycleSummary};
use crate::cache::MarketCache;
use crate::config::RiskParams;
use crate::errors::EngineError;
use crate::events::{EventBus, EventPayload};
use crate::exchange::{ExchangePort, PortfolioSnapshot};
use crate::executor::{Executor, OrderState};
use crate::journal::Journal;
use crate::performance::PerformanceTracker;
use crate::reasoning::{Decision, DecisionContext, ReasoningPort};
use crate::risk::{self, keyword_classifier, RiskGate};
use crate::scanner::{ScanCaches, Scanner};
use crate::strategy::{MarketOpportunity, StrategyEvaluator};
use crate::types::TradingMode;

/// Deadline on the per-cycle portfolio fetch.
const PORTFOLIO_DEADLINE: Duration = Duration::from_secs(2);

/// The cycle scheduler. Constructed once and consumed by [`Engine::run`].
pub struct Engine {
    state: Arc<AppState>,
    exchange: Arc<dyn ExchangePort>,
    reasoner: Arc<dyn ReasoningPort>,
    events: EventBus,

    scanner: Scanner,
    evaluator: StrategyEvaluator,
    gate: RiskGate,
    executor: Executor,
    tracker: PerformanceTracker,

    params: RiskParams,
    scan_caches: ScanCaches,
    opportunity_cache: MarketCache<MarketOpportunity>,
    journal: Option<Journal>,

    cycle_index: u64,
    /// UTC date for which the circuit breaker has tripped, if any.
    halted_date: Option<String>,
}

impl Engine {
    pub fn new(
        state: Arc<AppState>,
        exchange: Arc<dyn ExchangePort>,
        reasoner: Arc<dyn ReasoningPort>,
        events: EventBus,
    ) -> Self {
        let config = state.config.read().clone();
        let classifier = keyword_classifier();

        let journal = if config.journal_path.is_empty() {
            None
        } else {
            Some(Journal::new(&config.journal_path))
        };

        Self {
            scanner: Scanner::new(&config.scanner),
            evaluator: StrategyEvaluator::new(
                classifier.clone(),
                config.cache.opportunity_ttl_seconds,
            ),
            gate: RiskGate::new(classifier),
            executor: Executor::new(
                exchange.clone(),
                Duration::from_millis(config.executor.order_deadline_ms),
            ),
            tracker: PerformanceTracker::new(),
            params: config.risk.clone().clamped(),
            scan_caches: ScanCaches::from_config(&config),
            opportunity_cache: MarketCache::new(
                Duration::from_secs(config.cache.opportunity_ttl_seconds),
                config.cache.max_size,
            ),
            journal,
            cycle_index: 0,
            halted_date: None,
            state,
            exchange,
            reasoner,
            events,
        }
    }

    /// Drive cycles forever. The configured interval is re-read every cycle
    /// so runtime reconfiguration takes effect without a restart; the
    /// executor's rate-limit backoff stretches the gap when present.
    pub async fn run(mut self) {
        info!("cycle scheduler starting");
        loop {
            let started = Instant::now();
            self.run_cycle().await;

            let interval =
                Duration::from_secs(self.state.config.read().cycle_interval_seconds.max(1));
            let backoff = self.executor.current_backoff();
            let sleep = (interval + backoff).saturating_sub(started.elapsed());
            tokio::time::sleep(sleep).await;
        }
    }

    /// One full pipeline iteration. Every failure is converted into events
    /// at this boundary; the loop itself never dies.
    pub async fn run_cycle(&mut self) {
        self.cycle_index += 1;
        let cycle_started = Instant::now();
        self.events.publish(EventPayload::CycleBegin {
            cycle_index: self.cycle_index,
        });

        // ── 1. Portfolio refresh ────────────────────────────────────────
        let portfolio = match tokio::time::timeout(
            PORTFOLIO_DEADLINE,
            self.exchange.get_portfolio(),
        )
        .await
        {
            Err(_) => {
                let err = EngineError::from(crate::errors::ExchangeError::DeadlineExceeded {
                    operation: "get_portfolio",
                    deadline_ms: PORTFOLIO_DEADLINE.as_millis() as u64,
                });
                self.events.publish_error(&err);
                warn!("portfolio fetch timed out — cycle skipped");
                return self.finish_cycle(cycle_started, None, Vec::new());
            }
            Ok(Err(e)) => {
                let err = EngineError::from(e);
                self.events.publish_error(&err);
                warn!(error = %err, "portfolio fetch failed — cycle skipped");
                return self.finish_cycle(cycle_started, None, Vec::new());
            }
            Ok(Ok(p)) => p,
        };

        // ── 2. Performance observation ──────────────────────────────────
        self.tracker.observe_portfolio(&portfolio);
        let mut portfolio = portfolio;
        portfolio.peak_equity = self.tracker.state().peak_equity;
        portfolio.drawdown_pct = self.tracker.state().drawdown_pct;
        self.events.publish(EventPayload::UpdatePortfolio {
            portfolio: portfolio.clone(),
        });

        // ── 3. Circuit breaker (whole calendar day) ─────────────────────
        let today = Utc::now().format("%Y-%m-%d").to_string();
        match &self.halted_date {
            Some(date) if *date == today => {
                debug!("circuit breaker active — observing only");
                return self.finish_cycle(cycle_started, Some(portfolio), Vec::new());
            }
            Some(_) => {
                info!("date rolled — circuit breaker re-armed");
                self.halted_date = None;
            }
            None => {}
        }

        let daily_pnl_pct = portfolio.daily_pnl_pct();
        if daily_pnl_pct <= -self.params.max_daily_loss_pct {
            self.halted_date = Some(today);
            let err = EngineError::CircuitBreakerTripped(format!(
                "daily P&L {daily_pnl_pct:.1}% breached -{:.1}% — trading halted for the day",
                self.params.max_daily_loss_pct
            ));
            warn!(daily_pnl_pct, "circuit breaker tripped");
            self.events.publish_error(&err);
            return self.finish_cycle(cycle_started, Some(portfolio), Vec::new());
        }

        // Paused or killed engines keep observing but never trade.
        let trading_mode = self.state.config.read().trading_mode;
        if trading_mode != TradingMode::Live {
            debug!(mode = %trading_mode, "not live — observing only");
            return self.finish_cycle(cycle_started, Some(portfolio), Vec::new());
        }

        // ── 4. Adaptive risk parameters ─────────────────────────────────
        let (next_params, changes) = risk::adapt(self.tracker.state(), &self.params);
        for change in &changes {
            info!(
                param = change.param,
                old = change.old_value,
                new = change.new_value,
                reason = %change.reason,
                "risk parameter adapted"
            );
            self.events.publish(EventPayload::AutonomousDecision {
                param: change.param.to_string(),
                old_value: change.old_value,
                new_value: change.new_value,
                reason: change.reason.clone(),
            });
        }
        self.params = next_params;

        // Sweep resting remainders from the previous cycle before adding
        // new orders.
        self.executor.cancel_stale().await;

        // ── 5. Scan ─────────────────────────────────────────────────────
        let scanned = match self
            .scanner
            .scan(self.exchange.as_ref(), &mut self.scan_caches)
            .await
        {
            Err(e) => {
                self.events.publish_error(&e);
                warn!(error = %e, "scan failed — cycle skipped");
                return self.finish_cycle(cycle_started, Some(portfolio), Vec::new());
            }
            Ok(s) => s,
        };

        // ── 6. Evaluate ─────────────────────────────────────────────────
        let ranked = self.evaluator.evaluate_all(
            &scanned,
            &self.params,
            &mut self.opportunity_cache,
            Utc::now(),
        );
        self.events.publish(EventPayload::Opportunities {
            ranked: ranked.clone(),
        });

        // ── 7. Risk gate ────────────────────────────────────────────────
        let top_k = self.state.config.read().executor.top_k_admitted;
        let (admitted, rejections) =
            self.gate
                .filter_and_size(&ranked, &portfolio, &self.params, top_k);
        for rejection in rejections {
            if let EngineError::RiskBlocked { reason, ticker } = rejection.into_error() {
                self.events.publish(EventPayload::RiskBlocked { reason, ticker });
            }
        }

        // ── 8. Reasoner decision under deadline ─────────────────────────
        let decision = self.decide(&portfolio, &admitted).await;

        // ── 9. Act ──────────────────────────────────────────────────────
        self.apply_decision(decision, &admitted, &scanned, &portfolio)
            .await;

        self.finish_cycle(cycle_started, Some(portfolio), admitted);
    }

    /// Ask the reasoner, falling back to the top admitted opportunity on
    /// failure or timeout.
    async fn decide<'a>(
        &'a self,
        portfolio: &'a PortfolioSnapshot,
        admitted: &'a [MarketOpportunity],
    ) -> Decision {
        let context = DecisionContext {
            portfolio: portfolio.into(),
            opportunities: admitted.to_vec(),
            performance: self.tracker.feedback(),
            risk_params: self.params.clone(),
            external_signals: Vec::new(),
        };

        let deadline = self.state.config.read().reasoning_deadline();

        match tokio::time::timeout(deadline, self.reasoner.decide(&context)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(error = %e, "reasoner failed — falling back");
                self.fallback_decision(e.to_string(), admitted)
            }
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "reasoner deadline exceeded — falling back");
                self.fallback_decision(format!("decide exceeded {} ms", deadline.as_millis()), admitted)
            }
        }
    }

    /// Fallback decision used when the reasoner fails or misses its deadline.
    fn fallback_decision(&self, reason: String, admitted: &[MarketOpportunity]) -> Decision {
        let err = EngineError::ReasonerUnavailable(reason);
        self.events.publish_error(&err);
        match admitted.first() {
            Some(best) => Decision::Trade {
                ticker: best.ticker.clone(),
                side: best.side,
                size: best.suggested_size,
                price_hint: Some(best.entry_price),
                confidence: best.confidence,
                reasoning: "fallback to top admitted opportunity".to_string(),
            },
            None => Decision::Hold {
                reasoning: "reasoner unavailable, nothing admitted".to_string(),
            },
        }
    }

    /// Carry out the cycle's decision.
    async fn apply_decision(
        &mut self,
        decision: Decision,
        admitted: &[MarketOpportunity],
        scanned: &[crate::market::ScannedMarket],
        portfolio: &PortfolioSnapshot,
    ) {
        match decision {
            Decision::Hold { reasoning } => {
                debug!(%reasoning, "holding this cycle");
            }

            Decision::Trade {
                ticker,
                side,
                size,
                reasoning,
                ..
            } => {
                // The reasoner chooses among admitted opportunities; it
                // cannot resurrect something the risk gate refused.
                let Some(opp) = admitted
                    .iter()
                    .find(|o| o.ticker == ticker && o.side == side)
                else {
                    warn!(%ticker, "reasoner selected a non-admitted trade — blocked");
                    self.events.publish(EventPayload::RiskBlocked {
                        reason: "reasoner selection not admitted by risk gate".to_string(),
                        ticker: Some(ticker),
                    });
                    return;
                };

                let mut opp = opp.clone();
                // Size overrides only shrink; the gate's size is the cap.
                if size > 0 && size < opp.suggested_size {
                    opp.suggested_size = size;
                }
                debug!(ticker = %opp.ticker, %reasoning, "executing decision");

                let Some(book) = scanned
                    .iter()
                    .find(|s| s.market.ticker == opp.ticker)
                    .map(|s| &s.book)
                else {
                    warn!(ticker = %opp.ticker, "no book snapshot for admitted ticker — skipped");
                    return;
                };

                match self.executor.execute(&opp, book).await {
                    Ok(report) => self.record_execution(&opp, report),
                    Err(e) => self.events.publish_error(&e),
                }
            }

            Decision::Adjust {
                risk_param,
                new_value,
                reasoning,
            } => self.apply_adjustment(&risk_param, new_value, reasoning),

            Decision::Close { ticker, reasoning } => {
                let Some(position) = portfolio.positions.get(&ticker) else {
                    warn!(%ticker, "close requested for unknown position");
                    return;
                };
                info!(%ticker, %reasoning, "reasoner requested close");

                let flat_side = position.side().flipped();
                let price = scanned
                    .iter()
                    .find(|s| s.market.ticker == ticker)
                    .and_then(|s| s.book.ask(flat_side))
                    .map(|level| level.price);

                let Some(price) = price else {
                    warn!(%ticker, "no book to flatten against — skipped");
                    return;
                };

                match self
                    .executor
                    .flatten(&ticker, flat_side, price, position.quantity.unsigned_abs() as u32)
                    .await
                {
                    Ok(report) if report.fill_qty > 0 => {
                        self.events.publish(EventPayload::Execution {
                            order_id: report.order_id,
                            ticker,
                            side: flat_side,
                            qty: report.fill_qty,
                            fill_price: report.fill_price,
                            latency_ms: report.latency_ms,
                            slippage_pct: report.slippage_pct,
                        });
                    }
                    Ok(_) => debug!(%ticker, "close order resting"),
                    Err(e) => self.events.publish_error(&e),
                }
            }
        }
    }

    /// Fold a completed execution into events, the journal, and the
    /// performance tracker.
    fn record_execution(&mut self, opp: &MarketOpportunity, report: crate::executor::ExecutionReport) {
        match report.state {
            OrderState::Rejected => {
                let err = EngineError::from(crate::errors::ExchangeError::Permanent(format!(
                    "order rejected by venue for {}",
                    opp.ticker
                )));
                self.events.publish_error(&err);
            }
            _ => {
                if let Some(outcome) = report.outcome {
                    self.events.publish(EventPayload::Execution {
                        order_id: report.order_id,
                        ticker: opp.ticker.clone(),
                        side: opp.side,
                        qty: report.fill_qty,
                        fill_price: report.fill_price,
                        latency_ms: report.latency_ms,
                        slippage_pct: report.slippage_pct,
                    });
                    if let Some(journal) = &self.journal {
                        if let Err(e) = journal.append(&outcome) {
                            warn!(error = %e, "journal append failed");
                        }
                    }
                    self.tracker.record_outcome(&outcome);
                } else {
                    debug!(ticker = %opp.ticker, "order resting with no fill yet");
                }
            }
        }
    }

    /// Apply a reasoner-requested parameter change, with clamping.
    fn apply_adjustment(&mut self, risk_param: &str, new_value: f64, reasoning: String) {
        let old = self.params.clone();
        let mut next = self.params.clone();
        match risk_param {
            "kelly_fraction" => next.kelly_fraction = new_value,
            "min_edge_pct" => next.min_edge_pct = new_value,
            "max_position_pct" => next.max_position_pct = new_value.clamp(1.0, 100.0),
            "max_daily_loss_pct" => next.max_daily_loss_pct = new_value.clamp(1.0, 100.0),
            "max_concentration_pct" => next.max_concentration_pct = new_value.clamp(1.0, 100.0),
            "correlation_edge_multiplier" => {
                next.correlation_edge_multiplier = new_value.max(1.0)
            }
            other => {
                let err = EngineError::Validation(format!("unknown risk parameter '{other}'"));
                warn!(param = other, "reasoner adjustment rejected");
                self.events.publish_error(&err);
                return;
            }
        }
        self.params = next.clamped();

        let (old_value, new_value) = match risk_param {
            "kelly_fraction" => (old.kelly_fraction, self.params.kelly_fraction),
            "min_edge_pct" => (old.min_edge_pct, self.params.min_edge_pct),
            "max_position_pct" => (old.max_position_pct, self.params.max_position_pct),
            "max_daily_loss_pct" => (old.max_daily_loss_pct, self.params.max_daily_loss_pct),
            "max_concentration_pct" => {
                (old.max_concentration_pct, self.params.max_concentration_pct)
            }
            _ => (
                old.correlation_edge_multiplier,
                self.params.correlation_edge_multiplier,
            ),
        };

        info!(param = risk_param, old_value, new_value, %reasoning, "reasoner adjusted risk parameter");
        self.events.publish(EventPayload::AutonomousDecision {
            param: risk_param.to_string(),
            old_value,
            new_value,
            reason: reasoning,
        });
    }

    /// Publish the cycle summary and the CYCLE_END marker.
    fn finish_cycle(
        &mut self,
        started: Instant,
        portfolio: Option<PortfolioSnapshot>,
        admitted: Vec<MarketOpportunity>,
    ) {
        if let Some(portfolio) = portfolio {
            self.state.update_cycle(CycleSummary {
                cycle_index: self.cycle_index,
                portfolio,
                admitted,
                risk_params: self.params.clone(),
                performance: self.tracker.feedback(),
            });
        }

        self.events.publish(EventPayload::CycleEnd {
            cycle_index: self.cycle_index,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::errors::ExchangeError;
    use crate::events::EngineEvent;
    use crate::exchange::paper::PaperExchange;
    use crate::exchange::{OrderReceipt, OrderRequest};
    use crate::market::{Level, Market, OrderBook, ScannedMarket};
    use crate::reasoning::RuleBasedReasoner;
    use crate::types::MarketStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn live_config() -> BotConfig {
        let mut config = BotConfig::default();
        config.trading_mode = TradingMode::Live;
        config.journal_path = String::new();
        config
    }

    fn arb_universe() -> Vec<ScannedMarket> {
        vec![ScannedMarket {
            market: Market {
                ticker: "FED-CUT".into(),
                title: "Will the fed cut?".into(),
                status: MarketStatus::Open,
                volume: 10_000,
                open_interest: 2_000,
            },
            book: OrderBook {
                ticker: "FED-CUT".into(),
                yes_bid: Some(Level::new(48, 400)),
                yes_ask: Some(Level::new(49, 400)),
                no_bid: Some(Level::new(49, 400)),
                no_ask: Some(Level::new(50, 400)),
            },
        }]
    }

    fn engine_with(
        config: BotConfig,
        exchange: Arc<dyn ExchangePort>,
        reasoner: Arc<dyn ReasoningPort>,
    ) -> (Engine, mpsc::Receiver<EngineEvent>, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let (bus, rx) = EventBus::channel();
        let engine = Engine::new(state.clone(), exchange, reasoner, bus);
        (engine, rx, state)
    }

    fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn kinds(events: &[EngineEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.payload.kind()).collect()
    }

    #[tokio::test]
    async fn happy_path_cycle_executes_the_best_opportunity() {
        let venue = Arc::new(PaperExchange::with_universe(1_000_000, arb_universe()));
        let (mut engine, mut rx, _state) = engine_with(
            live_config(),
            venue.clone(),
            Arc::new(RuleBasedReasoner),
        );

        engine.run_cycle().await;

        let events = drain(&mut rx);
        let kinds = kinds(&events);
        assert!(kinds.contains(&"CYCLE_BEGIN"));
        assert!(kinds.contains(&"UPDATE_PORTFOLIO"));
        assert!(kinds.contains(&"OPPORTUNITIES"));
        assert!(kinds.contains(&"EXECUTION"));
        assert!(kinds.contains(&"CYCLE_END"));

        // The fill shows up at the venue on the next refresh, and the
        // outcome in the per-strategy stats.
        let portfolio = venue.get_portfolio().await.unwrap();
        assert_eq!(portfolio.positions["FED-CUT"].side(), crate::types::Side::Yes);
        assert_eq!(engine.tracker.state().per_strategy["arbitrage"].count, 1);
    }

    #[tokio::test]
    async fn paused_engine_observes_but_never_trades() {
        let mut config = live_config();
        config.trading_mode = TradingMode::Paused;
        let venue = Arc::new(PaperExchange::with_universe(1_000_000, arb_universe()));
        let (mut engine, mut rx, _state) =
            engine_with(config, venue.clone(), Arc::new(RuleBasedReasoner));

        engine.run_cycle().await;

        let events = drain(&mut rx);
        assert!(kinds(&events).contains(&"UPDATE_PORTFOLIO"));
        assert!(!kinds(&events).contains(&"EXECUTION"));
        assert!(venue.get_portfolio().await.unwrap().positions.is_empty());
    }

    // ── Circuit breaker ─────────────────────────────────────────────────

    struct LosingExchange {
        submit_calls: AtomicUsize,
    }

    #[async_trait]
    impl ExchangePort for LosingExchange {
        async fn list_open_markets(&self, _: usize) -> Result<Vec<Market>, ExchangeError> {
            Ok(vec![])
        }
        async fn get_order_book(&self, _: &str) -> Result<Option<OrderBook>, ExchangeError> {
            Ok(None)
        }
        async fn get_portfolio(&self) -> Result<PortfolioSnapshot, ExchangeError> {
            // Start-of-day 1000, now 900: daily P&L -10%.
            Ok(PortfolioSnapshot {
                cash: 90_000,
                equity: 90_000,
                daily_pnl: -10_000,
                positions: HashMap::new(),
                peak_equity: 0,
                drawdown_pct: 0.0,
            })
        }
        async fn submit_order(&self, _: &OrderRequest) -> Result<OrderReceipt, ExchangeError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            unreachable!("circuit breaker must prevent submissions")
        }
        async fn cancel_order(&self, _: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn circuit_breaker_halts_trading_for_the_day() {
        let venue = Arc::new(LosingExchange {
            submit_calls: AtomicUsize::new(0),
        });
        let (mut engine, mut rx, _state) =
            engine_with(live_config(), venue.clone(), Arc::new(RuleBasedReasoner));

        engine.run_cycle().await;
        let events = drain(&mut rx);
        let critical: Vec<_> = events
            .iter()
            .filter(|e| {
                matches!(
                    &e.payload,
                    EventPayload::Error { code, .. } if code == "CircuitBreakerTripped"
                )
            })
            .collect();
        assert_eq!(critical.len(), 1);
        assert!(engine.halted_date.is_some());

        // Subsequent cycles the same day stay halted and do not re-emit.
        engine.run_cycle().await;
        engine.run_cycle().await;
        let events = drain(&mut rx);
        assert!(!kinds(&events).contains(&"ERROR"));
        assert_eq!(venue.submit_calls.load(Ordering::SeqCst), 0);
    }

    // ── Reasoner timeout fallback ───────────────────────────────────────

    struct HangingReasoner;

    #[async_trait]
    impl ReasoningPort for HangingReasoner {
        async fn decide(&self, _: &DecisionContext) -> Result<Decision, EngineError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reasoner_timeout_falls_back_to_top_admitted() {
        let venue = Arc::new(PaperExchange::with_universe(1_000_000, arb_universe()));
        let (mut engine, mut rx, _state) =
            engine_with(live_config(), venue.clone(), Arc::new(HangingReasoner));

        engine.run_cycle().await;

        let events = drain(&mut rx);
        let reasoner_errors: Vec<_> = events
            .iter()
            .filter(|e| {
                matches!(
                    &e.payload,
                    EventPayload::Error { code, severity, .. }
                        if code == "ReasonerUnavailable"
                            && *severity == crate::errors::Severity::Warn
                )
            })
            .collect();
        assert_eq!(reasoner_errors.len(), 1);
        // The fallback still traded admitted[0].
        assert!(kinds(&events).contains(&"EXECUTION"));
        assert!(kinds(&events).contains(&"CYCLE_END"));
    }

    #[tokio::test]
    async fn win_streak_adapts_params_and_emits_exact_values() {
        let venue = Arc::new(PaperExchange::with_universe(1_000_000, arb_universe()));
        let (mut engine, mut rx, _state) =
            engine_with(live_config(), venue, Arc::new(RuleBasedReasoner));

        // Five straight winners before the cycle starts.
        for _ in 0..5 {
            engine.tracker.record_outcome(&crate::performance::TradeOutcome {
                ticker: "W".into(),
                strategy: crate::types::Strategy::Arbitrage,
                side: crate::types::Side::Yes,
                edge: 3.0,
                realized_pnl: 100,
                latency_ms: 5,
                slippage_pct: 0.0,
                timestamp: "2026-03-15T12:00:00Z".into(),
            });
        }

        engine.run_cycle().await;

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::AutonomousDecision { param, old_value, new_value, .. }
                if param == "kelly_fraction"
                    && (*old_value - 0.25).abs() < 1e-9
                    && (*new_value - 0.30).abs() < 1e-9
        )));
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::AutonomousDecision { param, old_value, new_value, .. }
                if param == "min_edge_pct"
                    && (*old_value - 2.0).abs() < 1e-9
                    && (*new_value - 1.8).abs() < 1e-9
        )));
        assert!((engine.params.kelly_fraction - 0.30).abs() < 1e-9);
        assert!((engine.params.min_edge_pct - 1.8).abs() < 1e-9);
    }

    // ── Adjust / Close decisions ────────────────────────────────────────

    struct ScriptedReasoner {
        decisions: Mutex<Vec<Decision>>,
    }

    #[async_trait]
    impl ReasoningPort for ScriptedReasoner {
        async fn decide(&self, _: &DecisionContext) -> Result<Decision, EngineError> {
            Ok(self.decisions.lock().pop().unwrap_or(Decision::Hold {
                reasoning: "script exhausted".into(),
            }))
        }
    }

    #[tokio::test]
    async fn adjust_decision_changes_params_with_clamping() {
        let venue = Arc::new(PaperExchange::with_universe(1_000_000, arb_universe()));
        let reasoner = Arc::new(ScriptedReasoner {
            decisions: Mutex::new(vec![Decision::Adjust {
                risk_param: "kelly_fraction".into(),
                new_value: 0.9,
                reasoning: "aggressive".into(),
            }]),
        });
        let (mut engine, mut rx, _state) = engine_with(live_config(), venue, reasoner);

        engine.run_cycle().await;

        // 0.9 clamps to the documented 0.50 ceiling.
        assert!((engine.params.kelly_fraction - 0.50).abs() < 1e-9);
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::AutonomousDecision { param, new_value, .. }
                if param == "kelly_fraction" && (*new_value - 0.50).abs() < 1e-9
        )));
    }

    #[tokio::test]
    async fn trade_decision_outside_admitted_set_is_blocked() {
        let venue = Arc::new(PaperExchange::with_universe(1_000_000, arb_universe()));
        let reasoner = Arc::new(ScriptedReasoner {
            decisions: Mutex::new(vec![Decision::Trade {
                ticker: "NOT-ADMITTED".into(),
                side: crate::types::Side::Yes,
                size: 5,
                price_hint: None,
                confidence: 0.9,
                reasoning: "hallucinated".into(),
            }]),
        });
        let (mut engine, mut rx, _state) = engine_with(live_config(), venue.clone(), reasoner);

        engine.run_cycle().await;

        let events = drain(&mut rx);
        assert!(!kinds(&events).contains(&"EXECUTION"));
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::RiskBlocked { reason, .. } if reason.contains("not admitted")
        )));
        assert!(venue.get_portfolio().await.unwrap().positions.is_empty());
    }

    // ── Submission deadline honoured ────────────────────────────────────

    struct SlowSubmitExchange {
        inner: PaperExchange,
    }

    #[async_trait]
    impl ExchangePort for SlowSubmitExchange {
        async fn list_open_markets(&self, limit: usize) -> Result<Vec<Market>, ExchangeError> {
            self.inner.list_open_markets(limit).await
        }
        async fn get_order_book(&self, t: &str) -> Result<Option<OrderBook>, ExchangeError> {
            self.inner.get_order_book(t).await
        }
        async fn get_portfolio(&self) -> Result<PortfolioSnapshot, ExchangeError> {
            self.inner.get_portfolio().await
        }
        async fn submit_order(&self, _: &OrderRequest) -> Result<OrderReceipt, ExchangeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
        async fn cancel_order(&self, id: &str) -> Result<(), ExchangeError> {
            self.inner.cancel_order(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_submission_emits_one_deadline_event_and_completes() {
        let venue = Arc::new(SlowSubmitExchange {
            inner: PaperExchange::with_universe(1_000_000, arb_universe()),
        });
        let (mut engine, mut rx, _state) =
            engine_with(live_config(), venue, Arc::new(RuleBasedReasoner));

        engine.run_cycle().await;

        let events = drain(&mut rx);
        let deadline_events: Vec<_> = events
            .iter()
            .filter(|e| {
                matches!(
                    &e.payload,
                    EventPayload::Error { code, .. } if code == "DeadlineExceeded"
                )
            })
            .collect();
        assert_eq!(deadline_events.len(), 1);
        assert!(kinds(&events).contains(&"CYCLE_END"));
    }
}
