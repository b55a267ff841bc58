// =============================================================================
// Reasoning Port — the external decision maker consulted once per cycle
// =============================================================================
//
// The engine packages its view of the world into a `DecisionContext`, hands
// it to the port under a deadline, and receives a tagged `Decision` back.
// A slow or failing reasoner never stalls the cycle: the scheduler falls
// back to the top admitted opportunity.
// =============================================================================

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RiskParams;
use crate::errors::EngineError;
use crate::exchange::PortfolioSnapshot;
use crate::performance::FeedbackMetrics;
use crate::strategy::MarketOpportunity;
use crate::types::Side;

// =============================================================================
// Context packet
// =============================================================================

/// Position summary inside the context packet.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPosition {
    pub ticker: String,
    pub quantity: i64,
    pub entry_price: u32,
    pub current_price: u32,
}

/// Portfolio summary inside the context packet.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPortfolio {
    pub cash: i64,
    pub equity: i64,
    pub daily_pnl: i64,
    pub positions: Vec<ContextPosition>,
}

impl From<&PortfolioSnapshot> for ContextPortfolio {
    fn from(p: &PortfolioSnapshot) -> Self {
        let mut positions: Vec<ContextPosition> = p
            .positions
            .values()
            .map(|pos| ContextPosition {
                ticker: pos.ticker.clone(),
                quantity: pos.quantity,
                entry_price: pos.entry_price,
                current_price: pos.current_price,
            })
            .collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Self {
            cash: p.cash,
            equity: p.equity,
            daily_pnl: p.daily_pnl,
            positions,
        }
    }
}

/// Everything the reasoner sees for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    pub portfolio: ContextPortfolio,
    /// Risk-admitted opportunities, best first.
    pub opportunities: Vec<MarketOpportunity>,
    pub performance: FeedbackMetrics,
    pub risk_params: RiskParams,
    /// Opaque upstream signals (news headlines, model outputs).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_signals: Vec<String>,
}

// =============================================================================
// Decision
// =============================================================================

/// Action returned by the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// Execute a specific trade; must name an admitted opportunity.
    Trade {
        ticker: String,
        side: Side,
        size: u32,
        #[serde(default)]
        price_hint: Option<u32>,
        confidence: f64,
        reasoning: String,
    },
    /// Do nothing this cycle.
    Hold { reasoning: String },
    /// Adjust one risk parameter.
    Adjust {
        risk_param: String,
        new_value: f64,
        reasoning: String,
    },
    /// Flatten an open position.
    Close { ticker: String, reasoning: String },
}

/// External decision maker. Called at most once per cycle, always under a
/// deadline.
#[async_trait]
pub trait ReasoningPort: Send + Sync {
    async fn decide(&self, context: &DecisionContext) -> Result<Decision, EngineError>;
}

// =============================================================================
// Built-in rule-based reasoner
// =============================================================================

/// Deterministic fallback reasoner used when no external endpoint is
/// configured: take the best admitted opportunity, hold otherwise.
#[derive(Debug, Default)]
pub struct RuleBasedReasoner;

#[async_trait]
impl ReasoningPort for RuleBasedReasoner {
    async fn decide(&self, context: &DecisionContext) -> Result<Decision, EngineError> {
        match context.opportunities.first() {
            Some(best) => Ok(Decision::Trade {
                ticker: best.ticker.clone(),
                side: best.side,
                size: best.suggested_size,
                price_hint: Some(best.entry_price),
                confidence: best.confidence,
                reasoning: format!("top ranked: {}", best.reasoning),
            }),
            None => Ok(Decision::Hold {
                reasoning: "no admitted opportunities".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_from_tagged_json() {
        let json = r#"{"action":"trade","ticker":"BTC-100K","side":"YES","size":12,"confidence":0.8,"reasoning":"clear edge"}"#;
        let d: Decision = serde_json::from_str(json).unwrap();
        assert_eq!(
            d,
            Decision::Trade {
                ticker: "BTC-100K".into(),
                side: Side::Yes,
                size: 12,
                price_hint: None,
                confidence: 0.8,
                reasoning: "clear edge".into(),
            }
        );

        let hold: Decision = serde_json::from_str(r#"{"action":"hold","reasoning":"thin"}"#).unwrap();
        assert!(matches!(hold, Decision::Hold { .. }));

        let adjust: Decision = serde_json::from_str(
            r#"{"action":"adjust","risk_param":"kelly_fraction","new_value":0.2,"reasoning":"chop"}"#,
        )
        .unwrap();
        assert!(matches!(adjust, Decision::Adjust { .. }));
    }

    #[tokio::test]
    async fn rule_based_reasoner_holds_on_empty_book() {
        let context = DecisionContext {
            portfolio: ContextPortfolio {
                cash: 0,
                equity: 0,
                daily_pnl: 0,
                positions: vec![],
            },
            opportunities: vec![],
            performance: FeedbackMetrics::default(),
            risk_params: RiskParams::default(),
            external_signals: vec![],
        };
        let d = RuleBasedReasoner.decide(&context).await.unwrap();
        assert!(matches!(d, Decision::Hold { .. }));
    }
}
