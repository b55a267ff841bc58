// =============================================================================
// Performance Tracker — realized results, streaks, drawdown, feedback
// =============================================================================
//
// Updated on every trade outcome and on each portfolio refresh. Owned by the
// cycle scheduler; nothing else writes it. `feedback()` condenses the state
// into the metrics-and-recommendations packet handed to the reasoner and to
// observers.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::exchange::PortfolioSnapshot;
use crate::types::{Side, Strategy};

/// The realized result of one executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub ticker: String,
    pub strategy: Strategy,
    pub side: Side,
    pub edge: f64,
    /// Realized gain in cents, signed.
    pub realized_pnl: i64,
    pub latency_ms: u64,
    /// Fill drift from the intended entry, in percent; favorable fills are
    /// negative.
    pub slippage_pct: f64,
    pub timestamp: String,
}

/// Running aggregates for one strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub count: u64,
    pub avg_edge: f64,
    pub avg_latency_ms: f64,
    pub total_pnl: i64,
}

/// Everything the engine knows about its own results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceState {
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: i64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub max_drawdown_pct: f64,
    pub peak_equity: i64,
    pub drawdown_pct: f64,
    pub per_strategy: HashMap<String, StrategyStats>,
}

impl PerformanceState {
    pub fn win_rate(&self) -> f64 {
        let total = self.wins + self.losses;
        if total == 0 {
            return 0.0;
        }
        self.wins as f64 / total as f64
    }
}

/// Condensed metrics plus derived recommendations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackMetrics {
    pub win_rate: f64,
    pub trades: u64,
    pub total_pnl: i64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    pub per_strategy: HashMap<String, StrategyStats>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_strategy: Option<String>,
}

// =============================================================================
// Tracker
// =============================================================================

/// Single-writer accumulator over trade outcomes and portfolio refreshes.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    state: PerformanceState,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PerformanceState {
        &self.state
    }

    /// Fold one realized outcome into wins/losses, streaks, and per-strategy
    /// running means.
    pub fn record_outcome(&mut self, outcome: &TradeOutcome) {
        let s = &mut self.state;

        if outcome.realized_pnl > 0 {
            s.wins += 1;
            s.consecutive_wins += 1;
            s.consecutive_losses = 0;
        } else if outcome.realized_pnl < 0 {
            s.losses += 1;
            s.consecutive_losses += 1;
            s.consecutive_wins = 0;
        }
        s.total_pnl += outcome.realized_pnl;

        let stats = s
            .per_strategy
            .entry(outcome.strategy.as_str().to_string())
            .or_default();
        stats.count += 1;
        let n = stats.count as f64;
        stats.avg_edge += (outcome.edge - stats.avg_edge) / n;
        stats.avg_latency_ms += (outcome.latency_ms as f64 - stats.avg_latency_ms) / n;
        stats.total_pnl += outcome.realized_pnl;

        debug!(
            ticker = %outcome.ticker,
            strategy = %outcome.strategy,
            realized_pnl = outcome.realized_pnl,
            wins = s.wins,
            losses = s.losses,
            streak_w = s.consecutive_wins,
            streak_l = s.consecutive_losses,
            "outcome recorded"
        );
    }

    /// Track peak equity and drawdown from a fresh portfolio snapshot.
    pub fn observe_portfolio(&mut self, portfolio: &PortfolioSnapshot) {
        let s = &mut self.state;
        s.peak_equity = s.peak_equity.max(portfolio.equity);
        s.drawdown_pct = if s.peak_equity > 0 {
            ((s.peak_equity - portfolio.equity) as f64 / s.peak_equity as f64 * 100.0).max(0.0)
        } else {
            0.0
        };
        s.max_drawdown_pct = s.max_drawdown_pct.max(s.drawdown_pct);
    }

    /// Build the feedback packet for the reasoner and observers.
    pub fn feedback(&self) -> FeedbackMetrics {
        let s = &self.state;
        let trades = s.wins + s.losses;
        let win_rate = s.win_rate();

        let mut recommendations = Vec::new();
        if trades > 0 && win_rate < 0.45 {
            recommendations.push("tighten min_edge".to_string());
        }
        if trades > 0 && win_rate > 0.65 {
            recommendations.push("size up cautiously".to_string());
        }
        if s.drawdown_pct > 5.0 {
            recommendations.push("risk reduction active".to_string());
        }

        FeedbackMetrics {
            win_rate,
            trades,
            total_pnl: s.total_pnl,
            consecutive_wins: s.consecutive_wins,
            consecutive_losses: s.consecutive_losses,
            drawdown_pct: s.drawdown_pct,
            max_drawdown_pct: s.max_drawdown_pct,
            per_strategy: s.per_strategy.clone(),
            recommendations,
            best_strategy: self.best_strategy(),
        }
    }

    /// Name the strategy whose total P&L leads the runner-up by at least
    /// 20%.
    fn best_strategy(&self) -> Option<String> {
        let mut ranked: Vec<(&String, i64)> = self
            .state
            .per_strategy
            .iter()
            .map(|(name, stats)| (name, stats.total_pnl))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let (best_name, best_pnl) = ranked.first()?;
        if *best_pnl <= 0 {
            return None;
        }
        match ranked.get(1) {
            None => Some((*best_name).clone()),
            Some((_, second_pnl)) => {
                if *second_pnl <= 0 || *best_pnl as f64 >= *second_pnl as f64 * 1.2 {
                    Some((*best_name).clone())
                } else {
                    None
                }
            }
        }
    }
}
