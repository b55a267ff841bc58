// =============================================================================
// Delphi Market Nexus — Main Entry Point
// =============================================================================
//
// The engine starts Paused for safety. Users must explicitly resume trading
// via the API once they have inspected the live state.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cache;
mod config;
mod engine;
mod errors;
mod executor;
mod events;
mod exchange;
mod journal;
mod market;
mod performance;
mod reasoning;
mod risk;
mod scanner;
mod strategy;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::BotConfig;
use crate::engine::Engine;
use crate::events::EventBus;
use crate::exchange::paper::PaperExchange;
use crate::exchange::rest::RestExchange;
use crate::exchange::ExchangePort;
use crate::reasoning::{http::HttpReasoner, ReasoningPort, RuleBasedReasoner};
use crate::types::{ExchangeMode, TradingMode};

/// Default paper-mode bankroll in cents ($10,000).
const DEFAULT_PAPER_CASH: i64 = 1_000_000;

const CONFIG_PATH: &str = "delphi_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Delphi Market Nexus — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = BotConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        BotConfig::default()
    });

    // SAFETY: always boot Paused; trading resumes via the API only.
    config.trading_mode = TradingMode::Paused;

    if let Ok(mode) = std::env::var("DELPHI_MODE") {
        match mode.to_lowercase().as_str() {
            "paper" => config.mode = ExchangeMode::Paper,
            "live" => config.mode = ExchangeMode::Live,
            other => warn!(mode = other, "unknown DELPHI_MODE — keeping configured mode"),
        }
    }

    info!(
        trading_mode = %config.trading_mode,
        mode = %config.mode,
        cycle_interval_seconds = config.cycle_interval_seconds,
        "Engine starting in SAFE mode (Paused)"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let mode = config.mode;
    let reasoning_endpoint = config.reasoning.endpoint.clone();
    let state = Arc::new(AppState::new(config));

    // ── 3. Build ports ───────────────────────────────────────────────────
    let exchange: Arc<dyn ExchangePort> = match mode {
        ExchangeMode::Paper => {
            let cash = std::env::var("DELPHI_PAPER_CASH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PAPER_CASH);
            Arc::new(PaperExchange::with_demo_universe(cash))
        }
        ExchangeMode::Live => {
            let base_url = std::env::var("DELPHI_EXCHANGE_URL")
                .unwrap_or_else(|_| "https://api.example-exchange.com".into());
            let api_key = std::env::var("DELPHI_API_KEY").unwrap_or_default();
            let api_secret = std::env::var("DELPHI_API_SECRET").unwrap_or_default();
            if api_key.is_empty() || api_secret.is_empty() {
                warn!("live mode without DELPHI_API_KEY/DELPHI_API_SECRET — requests will be rejected");
            }
            Arc::new(RestExchange::new(base_url, api_key, api_secret))
        }
    };

    let reasoner: Arc<dyn ReasoningPort> = match reasoning_endpoint {
        Some(endpoint) if !endpoint.is_empty() => {
            info!(%endpoint, "using HTTP reasoner");
            Arc::new(HttpReasoner::new(endpoint))
        }
        _ => {
            info!("no reasoner endpoint configured — using rule-based fallback");
            Arc::new(RuleBasedReasoner)
        }
    };

    // ── 4. Event relay ───────────────────────────────────────────────────
    let (event_bus, event_rx) = EventBus::channel();
    events::spawn_event_relay(state.clone(), event_rx);

    // ── 5. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("DELPHI_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 6. Cycle scheduler ───────────────────────────────────────────────
    let engine = Engine::new(state.clone(), exchange, reasoner, event_bus);
    tokio::spawn(async move { engine.run().await });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save config on shutdown");
    }

    info!("Delphi Market Nexus shut down complete.");
    Ok(())
}
