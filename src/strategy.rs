// =============================================================================
// Strategy Evaluator — multi-strategy edge detection per market
// =============================================================================
//
// Each (Market, OrderBook) is run through three detectors:
//
//   arbitrage      — yes_bid + no_bid drifts more than 2¢ from parity
//   spread_capture — tight YES spread worth joining one tick inside
//   value          — combined mids misprice the contract by more than 1.5¢
//
// At most one opportunity per strategy; the market emits its best candidate
// by edge · confidence · liquidity. Evaluation is pure in its inputs, so
// results are cached per (ticker, time bucket) and repeated calls inside a
// bucket are free.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::MarketCache;
use crate::config::RiskParams;
use crate::market::{is_tradeable_price, OrderBook, ScannedMarket};
use crate::risk::{CorrelationClassifier, CorrelationGroup};
use crate::types::{Side, Strategy};

/// Arbitrage fires when the bid sum is further than this from parity.
const ARBITRAGE_THRESHOLD_CENTS: f64 = 2.0;
/// Spread capture wants a YES spread strictly tighter than this.
const SPREAD_MAX_CENTS: u32 = 3;
/// Spread capture needs at least this much depth.
const SPREAD_MIN_LIQUIDITY: f64 = 0.04;
/// Value fires when combined mids drift further than this from parity.
const VALUE_THRESHOLD_CENTS: f64 = 1.5;

const ARBITRAGE_CONFIDENCE: f64 = 0.90;
const SPREAD_CONFIDENCE: f64 = 0.70;
const VALUE_CONFIDENCE: f64 = 0.60;

// =============================================================================
// Opportunity model
// =============================================================================

/// A concrete, priced trade candidate. Sized later by the risk gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOpportunity {
    pub ticker: String,
    pub side: Side,
    /// Entry price in cents, always 1..=99.
    pub entry_price: u32,
    /// Expected advantage in percent of contract notional.
    pub edge: f64,
    pub confidence: f64,
    pub liquidity_score: f64,
    pub strategy: Strategy,
    /// Contracts to buy; zero until the risk gate sizes the trade.
    pub suggested_size: u32,
    pub reasoning: String,
    pub correlation_group: CorrelationGroup,
    pub created_at: String,
}

impl MarketOpportunity {
    /// Ranking score across strategies and markets.
    pub fn score(&self) -> f64 {
        self.edge * self.confidence * self.liquidity_score
    }
}

/// One detector's verdict before it is wrapped into a full opportunity.
struct Candidate {
    strategy: Strategy,
    side: Side,
    entry_price: u32,
    edge: f64,
    confidence: f64,
    reasoning: String,
}

// =============================================================================
// Evaluator
// =============================================================================

/// Per-market opportunity detection with per-bucket caching.
pub struct StrategyEvaluator {
    classifier: CorrelationClassifier,
    /// Seconds per cache bucket; also the opportunity TTL.
    bucket_seconds: u64,
}

impl StrategyEvaluator {
    pub fn new(classifier: CorrelationClassifier, bucket_seconds: u64) -> Self {
        Self {
            classifier,
            bucket_seconds: bucket_seconds.max(1),
        }
    }

    /// Evaluate every scanned market and return opportunities ranked best
    /// first.
    pub fn evaluate_all(
        &self,
        scanned: &[ScannedMarket],
        params: &RiskParams,
        cache: &mut MarketCache<MarketOpportunity>,
        now: DateTime<Utc>,
    ) -> Vec<MarketOpportunity> {
        let bucket = now.timestamp() / self.bucket_seconds as i64;
        let mut opportunities = Vec::new();

        for candidate in scanned {
            let key = format!("{}:{}", candidate.market.ticker, bucket);
            let opportunity = match cache.get(&key) {
                Some(cached) => Some(cached),
                None => {
                    let fresh = self.evaluate_market(candidate, params, now);
                    if let Some(ref opp) = fresh {
                        // Cache writes stay on the scheduler task.
                        let _ = cache.put(&key, opp.clone());
                    }
                    fresh
                }
            };
            if let Some(opp) = opportunity {
                opportunities.push(opp);
            }
        }

        opportunities.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(count = opportunities.len(), "evaluation complete");
        opportunities
    }

    /// Run all detectors on one market; pure in its inputs.
    pub fn evaluate_market(
        &self,
        scanned: &ScannedMarket,
        params: &RiskParams,
        now: DateTime<Utc>,
    ) -> Option<MarketOpportunity> {
        let book = &scanned.book;
        if !book.is_coherent() {
            return None;
        }

        let liquidity = book.liquidity_score();

        let best = [arbitrage(book), spread_capture(book, liquidity), value(book)]
            .into_iter()
            .flatten()
            .filter(|c| c.edge >= params.min_edge_pct)
            .filter(|c| is_tradeable_price(c.entry_price))
            .max_by(|a, b| {
                (a.edge * a.confidence)
                    .partial_cmp(&(b.edge * b.confidence))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;

        Some(MarketOpportunity {
            ticker: scanned.market.ticker.clone(),
            side: best.side,
            entry_price: best.entry_price,
            edge: best.edge,
            confidence: best.confidence,
            liquidity_score: liquidity,
            strategy: best.strategy,
            suggested_size: 0,
            reasoning: best.reasoning,
            correlation_group: (self.classifier)(
                &scanned.market.ticker,
                &scanned.market.title,
            ),
            created_at: now.to_rfc3339(),
        })
    }
}

// =============================================================================
// Detectors
// =============================================================================

/// Bid sum far from parity: buy the cheap side at its ask.
fn arbitrage(book: &OrderBook) -> Option<Candidate> {
    let sum = book.bid_sum()? as f64;
    let deviation = (sum - 100.0).abs();
    if deviation <= ARBITRAGE_THRESHOLD_CENTS {
        return None;
    }

    let side = if sum < 100.0 { Side::Yes } else { Side::No };
    let entry = book.ask(side)?;
    Some(Candidate {
        strategy: Strategy::Arbitrage,
        side,
        entry_price: entry.price,
        edge: deviation,
        confidence: ARBITRAGE_CONFIDENCE,
        reasoning: format!("bid sum {sum:.0}¢ deviates {deviation:.1}¢ from parity"),
    })
}

/// Tight liquid YES spread: join one tick above the bid.
fn spread_capture(book: &OrderBook, liquidity: f64) -> Option<Candidate> {
    let spread = book.yes_spread()?;
    if spread >= SPREAD_MAX_CENTS || liquidity < SPREAD_MIN_LIQUIDITY {
        return None;
    }

    let bid = book.yes_bid?;
    Some(Candidate {
        strategy: Strategy::SpreadCapture,
        side: Side::Yes,
        entry_price: bid.price + 1,
        edge: spread as f64 / 2.0,
        confidence: SPREAD_CONFIDENCE,
        reasoning: format!("{spread}¢ spread with depth {liquidity:.2}"),
    })
}

/// Combined mids misprice the contract: buy the underpriced side.
fn value(book: &OrderBook) -> Option<Candidate> {
    let combined = book.yes_mid()? + book.no_mid()?;
    let deviation = (100.0 - combined).abs();
    if deviation <= VALUE_THRESHOLD_CENTS {
        return None;
    }

    let side = if combined < 100.0 { Side::Yes } else { Side::No };
    let entry = book.ask(side)?;
    Some(Candidate {
        strategy: Strategy::Value,
        side,
        entry_price: entry.price,
        edge: deviation,
        confidence: VALUE_CONFIDENCE,
        reasoning: format!("combined mids {combined:.1}¢ imply {deviation:.1}¢ of value"),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Level, Market};
    use crate::risk::keyword_classifier;
    use crate::types::MarketStatus;
    use chrono::TimeZone;

    fn scanned(ticker: &str, book: OrderBook) -> ScannedMarket {
        ScannedMarket {
            market: Market {
                ticker: ticker.into(),
                title: format!("{ticker} market"),
                status: MarketStatus::Open,
                volume: 1000,
                open_interest: 500,
            },
            book,
        }
    }

    fn book(yb: u32, ya: u32, nb: u32, na: u32, size: u32) -> OrderBook {
        OrderBook {
            ticker: "T".into(),
            yes_bid: Some(Level::new(yb, size)),
            yes_ask: Some(Level::new(ya, size)),
            no_bid: Some(Level::new(nb, size)),
            no_ask: Some(Level::new(na, size)),
        }
    }

    fn evaluator() -> StrategyEvaluator {
        StrategyEvaluator::new(keyword_classifier(), 30)
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn clear_arbitrage_book_emits_expected_opportunity() {
        // yes 48/49 (200x200), no 49/50 (200x200): bid sum 97.
        let sc = scanned("ARB", book(48, 49, 49, 50, 200));
        let opp = evaluator()
            .evaluate_market(&sc, &RiskParams::default(), fixed_now())
            .expect("opportunity expected");

        assert_eq!(opp.strategy, Strategy::Arbitrage);
        assert_eq!(opp.side, Side::Yes);
        assert_eq!(opp.entry_price, 49);
        assert!((opp.edge - 3.0).abs() < 1e-9);
        assert!((opp.confidence - 0.90).abs() < 1e-9);
        assert!((opp.liquidity_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn below_threshold_book_emits_nothing() {
        // Bid sum 99, spread 1: arbitrage misses its threshold and spread
        // capture's 0.5 edge is under min_edge_pct.
        let sc = scanned("QUIET", book(50, 51, 49, 50, 200));
        let opp = evaluator().evaluate_market(&sc, &RiskParams::default(), fixed_now());
        assert!(opp.is_none());
    }

    #[test]
    fn arbitrage_fires_iff_deviation_exceeds_two_cents() {
        // Deviation exactly 2¢: must not fire.
        let at_threshold = book(49, 50, 49, 50, 200);
        assert!(arbitrage(&at_threshold).is_none());

        // Deviation 3¢ below parity: fires on YES with the exact edge.
        let below = book(48, 49, 49, 50, 200);
        let c = arbitrage(&below).unwrap();
        assert_eq!(c.side, Side::Yes);
        assert!((c.edge - 3.0).abs() < 1e-12);

        // Deviation 3¢ above parity: fires on NO at the NO ask.
        let above = book(52, 53, 51, 52, 200);
        let c = arbitrage(&above).unwrap();
        assert_eq!(c.side, Side::No);
        assert_eq!(c.entry_price, 52);
        assert!((c.edge - 3.0).abs() < 1e-12);
    }

    #[test]
    fn arbitrage_requires_both_bids_and_the_entry_ask() {
        let mut missing_no = book(40, 41, 55, 56, 200);
        missing_no.no_bid = None;
        assert!(arbitrage(&missing_no).is_none());

        // Cheap YES side but no YES ask to lift.
        let mut no_ask = book(40, 41, 50, 51, 200);
        no_ask.yes_ask = None;
        assert!(arbitrage(&no_ask).is_none());
    }

    #[test]
    fn spread_capture_joins_one_tick_inside() {
        let tight = book(47, 49, 50, 52, 200);
        let c = spread_capture(&tight, tight.liquidity_score()).unwrap();
        assert_eq!(c.side, Side::Yes);
        assert_eq!(c.entry_price, 48);
        assert!((c.edge - 1.0).abs() < 1e-12);

        // Spread of exactly 3¢ is too wide.
        let wide = book(47, 50, 50, 52, 200);
        assert!(spread_capture(&wide, wide.liquidity_score()).is_none());

        // Illiquid book: 10/500 = 0.02 < 0.04.
        let thin = book(47, 49, 50, 52, 10);
        assert!(spread_capture(&thin, thin.liquidity_score()).is_none());
    }

    #[test]
    fn value_buys_the_underpriced_side() {
        // yes_mid 40.5, no_mid 50.5 → combined 91, deviation 9 → YES.
        let cheap_yes = book(40, 41, 50, 51, 200);
        let c = value(&cheap_yes).unwrap();
        assert_eq!(c.side, Side::Yes);
        assert_eq!(c.entry_price, 41);
        assert!((c.edge - 9.0).abs() < 1e-9);

        // Combined 109 → NO side underpriced relative to parity.
        let rich = book(54, 55, 54, 55, 200);
        let c = value(&rich).unwrap();
        assert_eq!(c.side, Side::No);
        assert_eq!(c.entry_price, 55);
    }

    #[test]
    fn emitted_entry_prices_stay_in_domain() {
        // Ask at 100 would leave no tradeable entry; nothing must be emitted
        // even though the deviation is large.
        let mut sc = scanned("EDGE", book(95, 99, 1, 2, 200));
        sc.book.no_ask = Some(Level::new(100, 200));
        sc.book.no_bid = Some(Level::new(10, 200));
        let params = RiskParams {
            min_edge_pct: 0.5,
            ..RiskParams::default()
        };
        if let Some(opp) = evaluator().evaluate_market(&sc, &params, fixed_now()) {
            assert!((1..=99).contains(&opp.entry_price));
        }
    }

    #[test]
    fn evaluation_is_idempotent_for_fixed_inputs() {
        let sc = scanned("SAME", book(48, 49, 49, 50, 200));
        let e = evaluator();
        let now = fixed_now();
        let a = e.evaluate_market(&sc, &RiskParams::default(), now).unwrap();
        let b = e.evaluate_market(&sc, &RiskParams::default(), now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn evaluate_all_ranks_by_score_and_caches_per_bucket() {
        let strong = scanned("STRONG", book(40, 41, 50, 51, 500));
        let weak = scanned("WEAK", book(48, 49, 49, 50, 100));
        let e = evaluator();
        let mut cache = MarketCache::new(std::time::Duration::from_secs(30), 200);
        let now = fixed_now();

        let ranked = e.evaluate_all(
            &[weak.clone(), strong.clone()],
            &RiskParams::default(),
            &mut cache,
            now,
        );
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].score() >= ranked[1].score());
        assert_eq!(cache.len(), 2);

        // Same bucket: results come back value-equal from cache.
        let again = e.evaluate_all(
            &[weak, strong],
            &RiskParams::default(),
            &mut cache,
            now + chrono::Duration::seconds(5),
        );
        assert_eq!(ranked, again);
    }
}
