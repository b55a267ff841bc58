// =============================================================================
// API Module — observer surface for dashboards and tooling
// =============================================================================
//
// REST endpoints for snapshots and control, plus a WebSocket that streams
// engine events. Authentication is a single shared token from the
// DELPHI_API_TOKEN environment variable; when unset, auth is disabled for
// local development.
// =============================================================================

pub mod rest;
pub mod ws;

/// Check a presented token against DELPHI_API_TOKEN.
pub fn validate_token(token: &str) -> bool {
    match std::env::var("DELPHI_API_TOKEN") {
        Ok(expected) if !expected.is_empty() => token == expected,
        _ => true,
    }
}
