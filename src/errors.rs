// =============================================================================
// Error taxonomy — typed failure kinds at the port boundaries
// =============================================================================
//
// Adapters convert transport-level failures into `ExchangeError` kinds at the
// boundary; nothing transport-specific (HTTP status codes, socket errors)
// leaks into the pipeline. The engine catches `EngineError` at cycle
// boundaries; only `Validation` aborts a cycle outright.
// =============================================================================

use serde::Serialize;

/// Failure kinds produced by the exchange boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    /// Transient network or exchange unavailability. Retry on the next
    /// natural cycle; never retried in-place.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Exchange throttling. The executor applies backoff to the next cycle.
    #[error("rate limited by exchange")]
    RateLimited {
        /// Server-suggested wait, when the exchange provides one.
        retry_after_ms: Option<u64>,
    },

    /// Invalid request, unknown ticker, or closed market. Never retried.
    #[error("permanent exchange rejection: {0}")]
    Permanent(String),

    /// A per-operation deadline elapsed and the call was cancelled at the
    /// port boundary.
    #[error("{operation} exceeded its {deadline_ms} ms deadline")]
    DeadlineExceeded {
        operation: &'static str,
        deadline_ms: u64,
    },
}

impl ExchangeError {
    /// Whether the natural next cycle may retry the same logical operation.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited { .. } | Self::DeadlineExceeded { .. }
        )
    }

    /// Stable machine-readable code for ERROR events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TransportError",
            Self::RateLimited { .. } => "RateLimited",
            Self::Permanent(_) => "PermanentError",
            Self::DeadlineExceeded { .. } => "DeadlineExceeded",
        }
    }
}

/// Failure kinds raised inside the engine pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Malformed domain value (price outside 1..=99, empty cache key).
    /// Programmer error; aborts the current cycle.
    #[error("validation failure: {0}")]
    Validation(String),

    /// The reasoning port failed or timed out; the engine falls back to the
    /// top admitted opportunity.
    #[error("reasoner unavailable: {0}")]
    ReasonerUnavailable(String),

    /// An opportunity was rejected by the risk gate. Not a fault; surfaces
    /// as a RISK_BLOCKED event rather than an ERROR.
    #[error("risk blocked: {reason}")]
    RiskBlocked {
        reason: String,
        ticker: Option<String>,
    },

    /// Daily loss limit reached. Trading halts for the calendar day; the
    /// engine keeps reading the portfolio.
    #[error("circuit breaker tripped: {0}")]
    CircuitBreakerTripped(String),
}

impl EngineError {
    /// Stable machine-readable code for ERROR events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Exchange(e) => e.code(),
            Self::Validation(_) => "ValidationError",
            Self::ReasonerUnavailable(_) => "ReasonerUnavailable",
            Self::RiskBlocked { .. } => "RiskBlocked",
            Self::CircuitBreakerTripped(_) => "CircuitBreakerTripped",
        }
    }

    /// Severity attached to the corresponding ERROR event.
    pub fn severity(&self) -> Severity {
        match self {
            Self::CircuitBreakerTripped(_) => Severity::Critical,
            Self::Validation(_) => Severity::Error,
            Self::Exchange(ExchangeError::Permanent(_)) => Severity::Error,
            _ => Severity::Warn,
        }
    }
}

/// Severity levels carried on ERROR events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}
