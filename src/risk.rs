// =============================================================================
// Risk Gate — correlation-aware filtering, Kelly sizing, adaptive parameters
// =============================================================================
//
// Two phases per cycle. First the correlation filter: exposure is counted
// per group across open positions and same-cycle selections, and a group at
// its cap only admits opportunities whose edge clears
// min_edge_pct · correlation_edge_multiplier. Then sizing: fractional Kelly
// scaled by confidence, capped by max_position_pct, with hard caps on
// concentration and the daily loss halt applied after.
//
// Parameter adaptation is a pure function of (performance, params) so the
// scheduler stays the only writer of the live RiskParams.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RiskParams;
use crate::errors::EngineError;
use crate::exchange::PortfolioSnapshot;
use crate::market::is_tradeable_price;
use crate::performance::PerformanceState;
use crate::strategy::MarketOpportunity;

// =============================================================================
// Correlation groups
// =============================================================================

/// Coarse category whose members are expected to move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationGroup {
    Election,
    Crypto,
    Stocks,
    Sports,
    Economy,
    Other,
}

impl std::fmt::Display for CorrelationGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Election => write!(f, "election"),
            Self::Crypto => write!(f, "crypto"),
            Self::Stocks => write!(f, "stocks"),
            Self::Sports => write!(f, "sports"),
            Self::Economy => write!(f, "economy"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Pluggable group assignment from (ticker, title). Alternative classifiers
/// (precomputed tables, learned models) drop in without touching the gate.
pub type CorrelationClassifier = Arc<dyn Fn(&str, &str) -> CorrelationGroup + Send + Sync>;

/// Default keyword matcher over ticker and title.
pub fn keyword_group(ticker: &str, title: &str) -> CorrelationGroup {
    let haystack = format!("{} {}", ticker, title).to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if any(&["election", "politics", "senate", "congress", "president"]) {
        CorrelationGroup::Election
    } else if any(&["btc", "eth", "crypto", "bitcoin", "ethereum"]) {
        CorrelationGroup::Crypto
    } else if any(&["sp500", "nasdaq", "dow"]) {
        CorrelationGroup::Stocks
    } else if any(&["nba", "nfl", "mlb"]) {
        CorrelationGroup::Sports
    } else if any(&["gdp", "cpi", "fed", "rate"]) {
        CorrelationGroup::Economy
    } else {
        CorrelationGroup::Other
    }
}

/// The keyword matcher boxed as a classifier.
pub fn keyword_classifier() -> CorrelationClassifier {
    Arc::new(keyword_group)
}

// =============================================================================
// Sizing
// =============================================================================

/// Contracts to buy for an opportunity, from fractional Kelly.
///
/// The entry price read as a probability is the market's implied chance; the
/// model's chance adds the edge on top. The resulting bankroll fraction is
/// scaled by `kelly_fraction` and confidence, then capped by
/// `max_position_pct`.
pub fn kelly_size(
    entry_price: u32,
    edge: f64,
    confidence: f64,
    equity: i64,
    params: &RiskParams,
) -> u32 {
    if equity <= 0 || !is_tradeable_price(entry_price) {
        return 0;
    }

    let price = entry_price as f64;
    let implied = price / 100.0;
    let model = (implied + edge / 100.0).clamp(0.01, 0.99);
    let odds = (100.0 - price) / price;

    let kelly = ((odds * model - (1.0 - model)) / odds).max(0.0);
    let fraction =
        (kelly * params.kelly_fraction * confidence).clamp(0.0, params.max_position_pct / 100.0);

    let target_notional = equity as f64 * fraction;
    (target_notional / price).floor() as u32
}

// =============================================================================
// Filtering
// =============================================================================

/// Why an opportunity was turned away. Not a fault; surfaces as a
/// RISK_BLOCKED event.
#[derive(Debug, Clone, Serialize)]
pub struct RiskRejection {
    pub ticker: String,
    pub reason: String,
}

impl RiskRejection {
    /// The taxonomy kind this rejection crosses the boundary as.
    pub fn into_error(self) -> EngineError {
        EngineError::RiskBlocked {
            reason: self.reason,
            ticker: Some(self.ticker),
        }
    }
}

/// A changed parameter, emitted as an AUTONOMOUS_DECISION event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamChange {
    pub param: &'static str,
    pub old_value: f64,
    pub new_value: f64,
    pub reason: String,
}

/// Correlation filter plus sizing.
pub struct RiskGate {
    classifier: CorrelationClassifier,
}

impl RiskGate {
    pub fn new(classifier: CorrelationClassifier) -> Self {
        Self { classifier }
    }

    /// Admit and size at most `top_k` opportunities, preserving their
    /// pre-rank order. Returns the admitted set and the per-opportunity
    /// rejections.
    pub fn filter_and_size(
        &self,
        opportunities: &[MarketOpportunity],
        portfolio: &PortfolioSnapshot,
        params: &RiskParams,
        top_k: usize,
    ) -> (Vec<MarketOpportunity>, Vec<RiskRejection>) {
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();

        // Full trading halt once the daily loss limit is hit.
        if portfolio.daily_pnl_pct() <= -params.max_daily_loss_pct {
            for opp in opportunities {
                rejected.push(RiskRejection {
                    ticker: opp.ticker.clone(),
                    reason: "daily loss limit reached".to_string(),
                });
            }
            return (admitted, rejected);
        }

        // Existing exposure per group, positions first.
        let mut group_counts: HashMap<CorrelationGroup, usize> = HashMap::new();
        for position in portfolio.positions.values() {
            let group = (self.classifier)(&position.ticker, "");
            *group_counts.entry(group).or_insert(0) += 1;
        }

        let override_edge = params.min_edge_pct * params.correlation_edge_multiplier;

        for opp in opportunities {
            if admitted.len() >= top_k {
                break;
            }

            let group = opp.correlation_group;
            let count = group_counts.get(&group).copied().unwrap_or(0);
            if count >= params.max_correlation_group_count && opp.edge < override_edge {
                debug!(
                    ticker = %opp.ticker,
                    group = %group,
                    count,
                    edge = opp.edge,
                    override_edge,
                    "correlation cap rejection"
                );
                rejected.push(RiskRejection {
                    ticker: opp.ticker.clone(),
                    reason: format!(
                        "correlation cap: {count} already in group {group}, edge {:.2} < {:.2}",
                        opp.edge, override_edge
                    ),
                });
                continue;
            }

            let size = kelly_size(
                opp.entry_price,
                opp.edge,
                opp.confidence,
                portfolio.equity,
                params,
            );
            if size == 0 {
                rejected.push(RiskRejection {
                    ticker: opp.ticker.clone(),
                    reason: "sized to zero contracts".to_string(),
                });
                continue;
            }

            // Concentration cap on post-trade exposure to this ticker.
            let existing = portfolio
                .positions
                .get(&opp.ticker)
                .map(|p| p.exposure())
                .unwrap_or(0);
            let post_trade = existing + size as i64 * opp.entry_price as i64;
            let limit = (portfolio.equity as f64 * params.max_concentration_pct / 100.0) as i64;
            if post_trade > limit {
                rejected.push(RiskRejection {
                    ticker: opp.ticker.clone(),
                    reason: format!(
                        "concentration cap: {post_trade}¢ exposure over {limit}¢ limit"
                    ),
                });
                continue;
            }

            let mut sized = opp.clone();
            sized.suggested_size = size;
            *group_counts.entry(group).or_insert(0) += 1;
            admitted.push(sized);
        }

        (admitted, rejected)
    }
}

// =============================================================================
// Adaptive parameter loop
// =============================================================================

/// Derive the next cycle's parameters from realized performance. Pure; the
/// caller owns the live copy and emits one event per changed parameter.
pub fn adapt(perf: &PerformanceState, params: &RiskParams) -> (RiskParams, Vec<ParamChange>) {
    let mut next = params.clone();
    let mut reasons: Vec<String> = Vec::new();

    if perf.consecutive_wins >= 5 {
        next.kelly_fraction *= 1.2;
        next.min_edge_pct *= 0.9;
        reasons.push(format!("win streak of {}", perf.consecutive_wins));
    }
    if perf.consecutive_losses >= 3 {
        next.kelly_fraction *= 0.7;
        next.min_edge_pct *= 1.3;
        reasons.push(format!("loss streak of {}", perf.consecutive_losses));
    }
    if perf.drawdown_pct > 5.0 {
        next.kelly_fraction *= 0.8;
        reasons.push(format!("drawdown at {:.1}%", perf.drawdown_pct));
    }

    next = next.clamped();
    let reason = reasons.join("; ");

    let mut changes = Vec::new();
    if (next.kelly_fraction - params.kelly_fraction).abs() > f64::EPSILON {
        changes.push(ParamChange {
            param: "kelly_fraction",
            old_value: params.kelly_fraction,
            new_value: next.kelly_fraction,
            reason: reason.clone(),
        });
    }
    if (next.min_edge_pct - params.min_edge_pct).abs() > f64::EPSILON {
        changes.push(ParamChange {
            param: "min_edge_pct",
            old_value: params.min_edge_pct,
            new_value: next.min_edge_pct,
            reason,
        });
    }

    (next, changes)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Position;
    use crate::types::{Side, Strategy};

    fn opp(ticker: &str, edge: f64, group: CorrelationGroup) -> MarketOpportunity {
        MarketOpportunity {
            ticker: ticker.into(),
            side: Side::Yes,
            entry_price: 50,
            edge,
            confidence: 0.9,
            liquidity_score: 0.5,
            strategy: Strategy::Arbitrage,
            suggested_size: 0,
            reasoning: "test".into(),
            correlation_group: group,
            created_at: "2026-03-15T12:00:00Z".into(),
        }
    }

    fn portfolio_with(positions: &[&str], equity: i64) -> PortfolioSnapshot {
        let positions = positions
            .iter()
            .map(|t| {
                (
                    t.to_string(),
                    Position {
                        ticker: t.to_string(),
                        quantity: 10,
                        entry_price: 50,
                        current_price: 50,
                        unrealized_pnl: 0,
                    },
                )
            })
            .collect();
        PortfolioSnapshot {
            cash: equity,
            equity,
            daily_pnl: 0,
            positions,
            peak_equity: equity,
            drawdown_pct: 0.0,
        }
    }

    fn gate() -> RiskGate {
        RiskGate::new(keyword_classifier())
    }

    #[test]
    fn keyword_groups_match_expected_categories() {
        assert_eq!(keyword_group("BTC-120K", ""), CorrelationGroup::Crypto);
        assert_eq!(keyword_group("NBA-FINALS", ""), CorrelationGroup::Sports);
        assert_eq!(
            keyword_group("X1", "Will the election flip the senate?"),
            CorrelationGroup::Election
        );
        assert_eq!(keyword_group("FED-CUT", ""), CorrelationGroup::Economy);
        assert_eq!(keyword_group("NASDAQ-5PCT", ""), CorrelationGroup::Stocks);
        assert_eq!(keyword_group("RAIN-NYC", "rain tomorrow"), CorrelationGroup::Other);
    }

    #[test]
    fn correlation_cap_rejects_saturated_group_unless_edge_override() {
        // Two crypto positions already open.
        let portfolio = portfolio_with(&["BTC-100K", "ETH-5K"], 1_000_000);
        let params = RiskParams::default();

        let opportunities = vec![
            opp("BTC-120K", 2.5, CorrelationGroup::Crypto),
            opp("NBA-FINALS", 2.5, CorrelationGroup::Sports),
        ];

        let (admitted, rejected) =
            gate().filter_and_size(&opportunities, &portfolio, &params, 3);

        // BTC-120K needs edge ≥ 2.0 · 1.5 = 3.0 and only has 2.5.
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].ticker, "NBA-FINALS");
        assert!(admitted[0].suggested_size > 0);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].ticker, "BTC-120K");
        assert!(rejected[0].reason.contains("correlation cap"));
    }

    #[test]
    fn strong_edge_bypasses_the_correlation_cap() {
        let portfolio = portfolio_with(&["BTC-100K", "ETH-5K"], 1_000_000);
        let opportunities = vec![opp("BTC-120K", 3.0, CorrelationGroup::Crypto)];

        let (admitted, rejected) =
            gate().filter_and_size(&opportunities, &portfolio, &RiskParams::default(), 3);
        assert_eq!(admitted.len(), 1);
        assert!(rejected.is_empty());
    }

    #[test]
    fn same_cycle_selections_count_toward_the_cap() {
        let portfolio = portfolio_with(&[], 10_000_000);
        let opportunities = vec![
            opp("BTC-A", 2.5, CorrelationGroup::Crypto),
            opp("BTC-B", 2.5, CorrelationGroup::Crypto),
            opp("BTC-C", 2.5, CorrelationGroup::Crypto),
        ];

        let (admitted, rejected) =
            gate().filter_and_size(&opportunities, &portfolio, &RiskParams::default(), 5);
        assert_eq!(admitted.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].ticker, "BTC-C");
    }

    #[test]
    fn daily_loss_limit_halts_all_admissions() {
        let mut portfolio = portfolio_with(&[], 900_000);
        portfolio.daily_pnl = -100_000; // start-of-day 1 000 000 → -10%
        let opportunities = vec![opp("ANY", 5.0, CorrelationGroup::Other)];

        let (admitted, rejected) =
            gate().filter_and_size(&opportunities, &portfolio, &RiskParams::default(), 3);
        assert!(admitted.is_empty());
        assert_eq!(rejected[0].reason, "daily loss limit reached");
    }

    #[test]
    fn tiny_equity_sizes_to_zero_and_rejects() {
        let portfolio = portfolio_with(&[], 100);
        let opportunities = vec![opp("SMALL", 2.5, CorrelationGroup::Other)];

        let (admitted, rejected) =
            gate().filter_and_size(&opportunities, &portfolio, &RiskParams::default(), 3);
        assert!(admitted.is_empty());
        assert_eq!(rejected[0].reason, "sized to zero contracts");
    }

    #[test]
    fn concentration_cap_rejects_oversized_exposure() {
        let mut portfolio = portfolio_with(&["BIG"], 1_000_000);
        // Existing exposure near the 20% limit already.
        portfolio.positions.get_mut("BIG").unwrap().quantity = 3900;
        let opportunities = vec![opp("BIG", 8.0, CorrelationGroup::Other)];

        let (admitted, rejected) =
            gate().filter_and_size(&opportunities, &portfolio, &RiskParams::default(), 3);
        assert!(admitted.is_empty());
        assert!(rejected[0].reason.contains("concentration cap"));
    }

    #[test]
    fn kelly_size_is_monotone_in_edge_and_confidence() {
        let params = RiskParams::default();
        let equity = 10_000_000;

        let mut last = 0;
        for edge in [0.5, 1.0, 2.0, 3.0, 5.0, 8.0, 12.0] {
            let size = kelly_size(50, edge, 0.9, equity, &params);
            assert!(size >= last, "size decreased as edge grew");
            last = size;
        }

        let mut last = 0;
        for confidence in [0.1, 0.3, 0.5, 0.7, 0.9, 1.0] {
            let size = kelly_size(50, 3.0, confidence, equity, &params);
            assert!(size >= last, "size decreased as confidence grew");
            last = size;
        }
    }

    #[test]
    fn kelly_size_respects_the_position_cap() {
        let params = RiskParams::default();
        let equity = 1_000_000;
        // Absurd edge: the fraction clamps to max_position_pct.
        let size = kelly_size(50, 60.0, 1.0, equity, &params);
        let max_notional = (equity as f64 * params.max_position_pct / 100.0) as i64;
        assert!(size as i64 * 50 <= max_notional);
    }

    #[test]
    fn adapt_applies_win_streak_loosening() {
        let mut perf = PerformanceState::default();
        perf.consecutive_wins = 5;
        let params = RiskParams::default();

        let (next, changes) = adapt(&perf, &params);
        assert!((next.kelly_fraction - 0.30).abs() < 1e-9);
        assert!((next.min_edge_pct - 1.8).abs() < 1e-9);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].param, "kelly_fraction");
        assert!((changes[0].old_value - 0.25).abs() < 1e-9);
        assert!((changes[0].new_value - 0.30).abs() < 1e-9);
    }

    #[test]
    fn adapt_applies_loss_streak_tightening_with_clamps() {
        let mut perf = PerformanceState::default();
        perf.consecutive_losses = 3;
        let mut params = RiskParams::default();
        params.kelly_fraction = 0.06;

        let (next, changes) = adapt(&perf, &params);
        // 0.06 · 0.7 = 0.042 clamps to the 0.05 floor.
        assert!((next.kelly_fraction - 0.05).abs() < 1e-9);
        assert!((next.min_edge_pct - 2.6).abs() < 1e-9);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn adapt_without_trigger_changes_nothing() {
        let perf = PerformanceState::default();
        let params = RiskParams::default();
        let (next, changes) = adapt(&perf, &params);
        assert_eq!(next, params);
        assert!(changes.is_empty());
    }

    #[test]
    fn adapt_drawdown_reduces_kelly_only() {
        let mut perf = PerformanceState::default();
        perf.drawdown_pct = 6.0;
        let (next, changes) = adapt(&perf, &RiskParams::default());
        assert!((next.kelly_fraction - 0.20).abs() < 1e-9);
        assert!((next.min_edge_pct - 2.0).abs() < 1e-9);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].param, "kelly_fraction");
    }
}
