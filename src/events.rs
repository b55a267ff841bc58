// =============================================================================
// Engine events — the outbound stream consumed by dashboards and log sinks
// =============================================================================
//
// Every cycle emits a sequence of typed events over a bounded channel. The
// scheduler never blocks on observers: when the channel is nearly full,
// routine events (cycle markers, portfolio refreshes, opportunity lists) are
// dropped; execution and error events are always attempted.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::app_state::AppState;
use crate::errors::{EngineError, Severity};
use crate::exchange::PortfolioSnapshot;
use crate::strategy::MarketOpportunity;
use crate::types::Side;

/// Bounded capacity of the outbound channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Slots kept free for essential events; routine events are dropped once the
/// channel is down to this much headroom.
const ROUTINE_RESERVE: usize = 8;

// =============================================================================
// Event payloads
// =============================================================================

/// Typed event payloads. Serialises as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    CycleBegin {
        cycle_index: u64,
    },
    CycleEnd {
        cycle_index: u64,
        duration_ms: u64,
    },
    UpdatePortfolio {
        portfolio: PortfolioSnapshot,
    },
    Opportunities {
        ranked: Vec<MarketOpportunity>,
    },
    Execution {
        order_id: String,
        ticker: String,
        side: Side,
        qty: u32,
        fill_price: u32,
        latency_ms: u64,
        slippage_pct: f64,
    },
    RiskBlocked {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ticker: Option<String>,
    },
    AutonomousDecision {
        param: String,
        old_value: f64,
        new_value: f64,
        reason: String,
    },
    Error {
        severity: Severity,
        code: String,
        message: String,
    },
}

impl EventPayload {
    /// Trade and error events survive backpressure; everything else is
    /// droppable.
    pub fn is_essential(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Error { .. })
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CycleBegin { .. } => "CYCLE_BEGIN",
            Self::CycleEnd { .. } => "CYCLE_END",
            Self::UpdatePortfolio { .. } => "UPDATE_PORTFOLIO",
            Self::Opportunities { .. } => "OPPORTUNITIES",
            Self::Execution { .. } => "EXECUTION",
            Self::RiskBlocked { .. } => "RISK_BLOCKED",
            Self::AutonomousDecision { .. } => "AUTONOMOUS_DECISION",
            Self::Error { .. } => "ERROR",
        }
    }
}

/// A payload stamped with its emission time.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    /// ISO 8601 emission timestamp.
    pub timestamp: String,
}

impl EngineEvent {
    pub fn now(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// =============================================================================
// Event bus
// =============================================================================

/// Sender half of the outbound event channel, with the drop policy applied
/// at publish time.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventBus {
    /// Create the bus plus the receiver the relay task drains.
    pub fn channel() -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Publish an event without blocking the cycle.
    ///
    /// Routine events are dropped when the channel is nearly full; essential
    /// events are attempted up to actual capacity and a warning is logged if
    /// even that fails.
    pub fn publish(&self, payload: EventPayload) {
        let essential = payload.is_essential();

        if !essential && self.tx.capacity() <= ROUTINE_RESERVE {
            trace!(kind = payload.kind(), "event channel saturated — routine event dropped");
            return;
        }

        let kind = payload.kind();
        match self.tx.try_send(EngineEvent::now(payload)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(kind, "event channel full — event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(kind, "event channel closed — no observers");
            }
        }
    }

    /// Publish the ERROR event corresponding to an engine failure.
    pub fn publish_error(&self, err: &EngineError) {
        self.publish(EventPayload::Error {
            severity: err.severity(),
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

/// Drain the outbound channel into the shared state (ring buffers + the
/// WebSocket fan-out). Runs until the engine drops its bus.
pub fn spawn_event_relay(state: Arc<AppState>, mut rx: mpsc::Receiver<EngineEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            state.apply_event(event);
        }
        debug!("event relay stopped — engine channel closed");
    });
}
