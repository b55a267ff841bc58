// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Delphi trading engine.  Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{ExchangeMode, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_cycle_interval_seconds() -> u64 {
    10
}

fn default_scanner_concurrency() -> usize {
    20
}

fn default_market_limit() -> usize {
    50
}

fn default_markets_ttl_seconds() -> u64 {
    20
}

fn default_opportunity_ttl_seconds() -> u64 {
    30
}

fn default_cache_max_size() -> usize {
    200
}

fn default_max_position_pct() -> f64 {
    15.0
}

fn default_min_edge_pct() -> f64 {
    2.0
}

fn default_kelly_fraction() -> f64 {
    0.25
}

fn default_max_daily_loss_pct() -> f64 {
    10.0
}

fn default_max_concentration_pct() -> f64 {
    20.0
}

fn default_max_correlation_group_count() -> usize {
    2
}

fn default_correlation_edge_multiplier() -> f64 {
    1.5
}

fn default_order_deadline_ms() -> u64 {
    2000
}

fn default_top_k_admitted() -> usize {
    3
}

fn default_reasoning_deadline_ms() -> u64 {
    3000
}

fn default_journal_path() -> String {
    "trade_journal.jsonl".to_string()
}

// =============================================================================
// RiskParams
// =============================================================================

/// Tunable risk parameters. The engine owns a working copy that the adaptive
/// loop mutates between cycles; this struct only carries the starting values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Maximum single-position size as a percentage of equity.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    /// Opportunities below this edge (percent of contract notional) are
    /// rejected outright.
    #[serde(default = "default_min_edge_pct")]
    pub min_edge_pct: f64,

    /// Fraction of full Kelly actually wagered. Clamped to
    /// [`KELLY_FRACTION_MIN`], [`KELLY_FRACTION_MAX`] by the adaptive loop.
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,

    /// Daily loss, as a percentage of start-of-day equity, at which the
    /// circuit breaker halts trading for the calendar day.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Maximum post-trade exposure to a single ticker as a percentage of
    /// equity.
    #[serde(default = "default_max_concentration_pct")]
    pub max_concentration_pct: f64,

    /// Maximum combined open positions + same-cycle selections per
    /// correlation group.
    #[serde(default = "default_max_correlation_group_count")]
    pub max_correlation_group_count: usize,

    /// Edge multiple that lets an opportunity bypass the correlation cap.
    #[serde(default = "default_correlation_edge_multiplier")]
    pub correlation_edge_multiplier: f64,
}

/// Lower clamp for `kelly_fraction`.
pub const KELLY_FRACTION_MIN: f64 = 0.05;
/// Upper clamp for `kelly_fraction`.
pub const KELLY_FRACTION_MAX: f64 = 0.50;
/// Lower clamp for `min_edge_pct`.
pub const MIN_EDGE_PCT_FLOOR: f64 = 0.5;
/// Upper clamp for `min_edge_pct`.
pub const MIN_EDGE_PCT_CEIL: f64 = 10.0;

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            max_position_pct: default_max_position_pct(),
            min_edge_pct: default_min_edge_pct(),
            kelly_fraction: default_kelly_fraction(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_concentration_pct: default_max_concentration_pct(),
            max_correlation_group_count: default_max_correlation_group_count(),
            correlation_edge_multiplier: default_correlation_edge_multiplier(),
        }
    }
}

impl RiskParams {
    /// Clamp all adaptive fields into their documented bounds.
    pub fn clamped(mut self) -> Self {
        self.kelly_fraction = self
            .kelly_fraction
            .clamp(KELLY_FRACTION_MIN, KELLY_FRACTION_MAX);
        self.min_edge_pct = self.min_edge_pct.clamp(MIN_EDGE_PCT_FLOOR, MIN_EDGE_PCT_CEIL);
        self
    }
}

// =============================================================================
// Subsystem configs
// =============================================================================

/// Scanner fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Parallel order-book fetch workers. Clamped to 1..=64.
    #[serde(default = "default_scanner_concurrency")]
    pub concurrency: usize,

    /// Markets requested from the exchange per scan. Clamped to 1..=500.
    #[serde(default = "default_market_limit")]
    pub market_limit: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_scanner_concurrency(),
            market_limit: default_market_limit(),
        }
    }
}

/// Cache TTL and size settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for the global market-list entry.
    #[serde(default = "default_markets_ttl_seconds")]
    pub markets_ttl_seconds: u64,

    /// TTL for per-ticker order books and analyzed opportunities.
    #[serde(default = "default_opportunity_ttl_seconds")]
    pub opportunity_ttl_seconds: u64,

    /// Maximum entries per cache instance.
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            markets_ttl_seconds: default_markets_ttl_seconds(),
            opportunity_ttl_seconds: default_opportunity_ttl_seconds(),
            max_size: default_cache_max_size(),
        }
    }
}

/// Executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Deadline for a single order submission before it is treated as timed
    /// out.
    #[serde(default = "default_order_deadline_ms")]
    pub order_deadline_ms: u64,

    /// How many risk-approved opportunities are retained per cycle.
    #[serde(default = "default_top_k_admitted")]
    pub top_k_admitted: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            order_deadline_ms: default_order_deadline_ms(),
            top_k_admitted: default_top_k_admitted(),
        }
    }
}

/// Reasoning port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Upper bound on a single `decide` call. The effective per-cycle
    /// deadline is the smaller of this and half the cycle interval.
    #[serde(default = "default_reasoning_deadline_ms")]
    pub deadline_ms: u64,

    /// Optional HTTP endpoint of the external reasoner. When absent the
    /// built-in rule-based reasoner is used.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_reasoning_deadline_ms(),
            endpoint: None,
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level runtime configuration for the Delphi engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // --- Operational modes ---------------------------------------------------

    /// Current trading mode: Live, Paused, or Killed.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Whether orders reach the real exchange or the paper simulator.
    #[serde(default)]
    pub mode: ExchangeMode,

    // --- Cycle ---------------------------------------------------------------

    /// Seconds between cycle starts. Minimum 1.
    #[serde(default = "default_cycle_interval_seconds")]
    pub cycle_interval_seconds: u64,

    // --- Subsystems ----------------------------------------------------------

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub risk: RiskParams,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub reasoning: ReasoningConfig,

    // --- Audit ---------------------------------------------------------------

    /// Append-only trade-outcome journal. Empty string disables journaling.
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            mode: ExchangeMode::Paper,
            cycle_interval_seconds: default_cycle_interval_seconds(),
            scanner: ScannerConfig::default(),
            cache: CacheConfig::default(),
            risk: RiskParams::default(),
            executor: ExecutorConfig::default(),
            reasoning: ReasoningConfig::default(),
            journal_path: default_journal_path(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        let config = config.validated();

        info!(
            path = %path.display(),
            trading_mode = %config.trading_mode,
            mode = %config.mode,
            cycle_interval_seconds = config.cycle_interval_seconds,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Clamp out-of-range values into their documented bounds.
    pub fn validated(mut self) -> Self {
        self.cycle_interval_seconds = self.cycle_interval_seconds.max(1);
        self.scanner.concurrency = self.scanner.concurrency.clamp(1, 64);
        self.scanner.market_limit = self.scanner.market_limit.clamp(1, 500);
        self.cache.max_size = self.cache.max_size.max(1);
        self.executor.top_k_admitted = self.executor.top_k_admitted.max(1);
        self.risk = self.risk.clamped();
        self
    }

    /// Effective deadline for the per-cycle reasoning call.
    pub fn reasoning_deadline(&self) -> std::time::Duration {
        let half_cycle_ms = self.cycle_interval_seconds * 1000 / 2;
        std::time::Duration::from_millis(self.reasoning.deadline_ms.min(half_cycle_ms.max(1)))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.mode, ExchangeMode::Paper);
        assert_eq!(cfg.cycle_interval_seconds, 10);
        assert_eq!(cfg.scanner.concurrency, 20);
        assert_eq!(cfg.scanner.market_limit, 50);
        assert_eq!(cfg.cache.markets_ttl_seconds, 20);
        assert_eq!(cfg.cache.opportunity_ttl_seconds, 30);
        assert_eq!(cfg.cache.max_size, 200);
        assert_eq!(cfg.executor.order_deadline_ms, 2000);
        assert_eq!(cfg.executor.top_k_admitted, 3);
        assert_eq!(cfg.reasoning.deadline_ms, 3000);
        assert!((cfg.risk.max_position_pct - 15.0).abs() < f64::EPSILON);
        assert!((cfg.risk.min_edge_pct - 2.0).abs() < f64::EPSILON);
        assert!((cfg.risk.kelly_fraction - 0.25).abs() < f64::EPSILON);
        assert!((cfg.risk.max_daily_loss_pct - 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.risk.max_correlation_group_count, 2);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: BotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.mode, ExchangeMode::Paper);
        assert_eq!(cfg.cycle_interval_seconds, 10);
        assert_eq!(cfg.executor.top_k_admitted, 3);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "mode": "live", "scanner": { "concurrency": 8 } }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mode, ExchangeMode::Live);
        assert_eq!(cfg.scanner.concurrency, 8);
        assert_eq!(cfg.scanner.market_limit, 50);
        assert_eq!(cfg.cache.max_size, 200);
    }

    #[test]
    fn validated_clamps_out_of_range_values() {
        let mut cfg = BotConfig::default();
        cfg.cycle_interval_seconds = 0;
        cfg.scanner.concurrency = 500;
        cfg.scanner.market_limit = 0;
        cfg.risk.kelly_fraction = 0.9;
        cfg.risk.min_edge_pct = 0.0;
        let cfg = cfg.validated();
        assert_eq!(cfg.cycle_interval_seconds, 1);
        assert_eq!(cfg.scanner.concurrency, 64);
        assert_eq!(cfg.scanner.market_limit, 1);
        assert!((cfg.risk.kelly_fraction - KELLY_FRACTION_MAX).abs() < f64::EPSILON);
        assert!((cfg.risk.min_edge_pct - MIN_EDGE_PCT_FLOOR).abs() < f64::EPSILON);
    }

    #[test]
    fn reasoning_deadline_is_capped_by_half_cycle() {
        let mut cfg = BotConfig::default();
        // 10 s cycle: min(3000 ms, 5000 ms) = 3000 ms.
        assert_eq!(cfg.reasoning_deadline().as_millis(), 3000);
        // 4 s cycle: min(3000 ms, 2000 ms) = 2000 ms.
        cfg.cycle_interval_seconds = 4;
        assert_eq!(cfg.reasoning_deadline().as_millis(), 2000);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = BotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.cycle_interval_seconds, cfg2.cycle_interval_seconds);
        assert_eq!(cfg.scanner.concurrency, cfg2.scanner.concurrency);
        assert_eq!(cfg.risk, cfg2.risk);
    }
}
