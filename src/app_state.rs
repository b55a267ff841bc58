// =============================================================================
// Central Application State — Delphi Market Nexus
// =============================================================================
//
// The observer-facing half of the engine. The cycle scheduler owns all
// trading state and publishes copies here; REST handlers and the WebSocket
// feed only ever read. Thread safety follows the usual split:
//
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - tokio broadcast for fanning events out to WebSocket subscribers.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{BotConfig, RiskParams};
use crate::events::{EngineEvent, EventPayload};
use crate::exchange::PortfolioSnapshot;
use crate::performance::FeedbackMetrics;
use crate::strategy::MarketOpportunity;

/// Maximum number of recent events retained for late-joining observers.
const MAX_RECENT_EVENTS: usize = 100;
/// Maximum number of recent errors retained.
const MAX_RECENT_ERRORS: usize = 50;
/// Broadcast buffer per WebSocket subscriber.
const BROADCAST_CAPACITY: usize = 256;

/// A recorded error event for the observer error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub severity: String,
    pub code: String,
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// What the scheduler publishes at the end of every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_index: u64,
    pub portfolio: PortfolioSnapshot,
    pub admitted: Vec<MarketOpportunity>,
    pub risk_params: RiskParams,
    pub performance: FeedbackMetrics,
}

/// Shared state between the engine task and the API surface.
pub struct AppState {
    /// Monotonically increasing version counter, incremented on every
    /// meaningful mutation. The WebSocket feed uses it to detect changes.
    pub state_version: AtomicU64,

    pub config: RwLock<BotConfig>,

    /// Latest end-of-cycle summary.
    latest: RwLock<Option<CycleSummary>>,

    recent_events: RwLock<Vec<EngineEvent>>,
    recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Fan-out to WebSocket subscribers.
    events_tx: broadcast::Sender<EngineEvent>,

    /// Instant the engine was started; used for uptime.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: BotConfig) -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state_version: AtomicU64::new(1),
            config: RwLock::new(config),
            latest: RwLock::new(None),
            recent_events: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            events_tx,
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Event intake (called by the relay task) ─────────────────────────

    /// Record an event into the ring buffers and fan it out to subscribers.
    pub fn apply_event(&self, event: EngineEvent) {
        if let EventPayload::Error {
            ref severity,
            ref code,
            ref message,
        } = event.payload
        {
            let mut errors = self.recent_errors.write();
            errors.push(ErrorRecord {
                severity: severity.to_string(),
                code: code.clone(),
                message: message.clone(),
                at: event.timestamp.clone(),
            });
            while errors.len() > MAX_RECENT_ERRORS {
                errors.remove(0);
            }
        }

        {
            let mut events = self.recent_events.write();
            events.push(event.clone());
            while events.len() > MAX_RECENT_EVENTS {
                events.remove(0);
            }
        }

        // No subscribers is fine; the send just reports zero receivers.
        let _ = self.events_tx.send(event);
        self.increment_version();
    }

    /// Subscribe to the live event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    // ── Cycle summary ───────────────────────────────────────────────────

    pub fn update_cycle(&self, summary: CycleSummary) {
        *self.latest.write() = Some(summary);
        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build the complete serialisable snapshot served over REST and pushed
    /// to fresh WebSocket connections.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.config.read();
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_s: self.start_time.elapsed().as_secs(),
            trading_mode: config.trading_mode.to_string(),
            mode: config.mode.to_string(),
            cycle: self.latest.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }

    /// Most recent events, oldest first.
    pub fn recent_events(&self) -> Vec<EngineEvent> {
        self.recent_events.read().clone()
    }
}

/// Full engine state snapshot for observers.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_s: u64,
    pub trading_mode: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<CycleSummary>,
    pub recent_errors: Vec<ErrorRecord>,
}
