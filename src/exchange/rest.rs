// =============================================================================
// Live REST adapter — HMAC-SHA256 signed requests against the exchange API
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Every signed
// request carries the API key as a header and a millisecond timestamp in the
// signed query to bound replay.
//
// All responses are converted into the typed error kinds at this boundary:
// HTTP 429 becomes RateLimited, other 4xx become Permanent, 5xx and socket
// errors become Transport. Duplicate submissions are suppressed server-side
// via the order's client_id.
// =============================================================================

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::errors::ExchangeError;
use crate::exchange::{
    ExchangePort, OrderReceipt, OrderRequest, OrderStatus, PortfolioSnapshot, Position,
};
use crate::market::{Level, Market, OrderBook};
use crate::types::MarketStatus;

type HmacSha256 = Hmac<Sha256>;

/// REST client for the live venue.
#[derive(Clone)]
pub struct RestExchange {
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl RestExchange {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` — venue API root, e.g. `https://api.example-exchange.com`.
    /// * `api_key`  — sent as a header, never in query params.
    /// * `secret`   — used exclusively for HMAC signing.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-API-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            secret: secret.into(),
            base_url: base_url.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `payload`.
    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Append timestamp and signature to a query string.
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Response handling
    // -------------------------------------------------------------------------

    /// Convert a reqwest failure into a typed kind.
    fn transport_error(operation: &'static str, err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::DeadlineExceeded {
                operation,
                deadline_ms: 10_000,
            }
        } else {
            ExchangeError::Transport(format!("{operation}: {err}"))
        }
    }

    /// Map a non-success status to a typed kind.
    fn status_error(status: StatusCode, body: &str, retry_after_ms: Option<u64>) -> ExchangeError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            ExchangeError::RateLimited { retry_after_ms }
        } else if status.is_client_error() {
            ExchangeError::Permanent(format!("{status}: {body}"))
        } else {
            ExchangeError::Transport(format!("{status}: {body}"))
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        resp: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = resp.status();
        let retry_after_ms = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| secs * 1000);

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(operation, %status, "exchange request rejected");
            return Err(Self::status_error(status, &body, retry_after_ms));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ExchangeError::Transport(format!("{operation}: malformed body: {e}")))
    }
}

// =============================================================================
// Wire DTOs
// =============================================================================

#[derive(Debug, Deserialize)]
struct WireMarket {
    ticker: String,
    #[serde(default)]
    title: String,
    status: MarketStatus,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    open_interest: u64,
}

impl From<WireMarket> for Market {
    fn from(w: WireMarket) -> Self {
        Self {
            ticker: w.ticker,
            title: w.title,
            status: w.status,
            volume: w.volume,
            open_interest: w.open_interest,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMarkets {
    markets: Vec<WireMarket>,
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    price: u32,
    size: u32,
}

#[derive(Debug, Deserialize)]
struct WireBook {
    ticker: String,
    yes_bid: Option<WireLevel>,
    yes_ask: Option<WireLevel>,
    no_bid: Option<WireLevel>,
    no_ask: Option<WireLevel>,
}

impl From<WireBook> for OrderBook {
    fn from(w: WireBook) -> Self {
        let level = |l: Option<WireLevel>| l.map(|l| Level::new(l.price, l.size));
        Self {
            ticker: w.ticker,
            yes_bid: level(w.yes_bid),
            yes_ask: level(w.yes_ask),
            no_bid: level(w.no_bid),
            no_ask: level(w.no_ask),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePosition {
    ticker: String,
    quantity: i64,
    entry_price: u32,
    current_price: u32,
    #[serde(default)]
    unrealized_pnl: i64,
}

#[derive(Debug, Deserialize)]
struct WirePortfolio {
    cash: i64,
    equity: i64,
    #[serde(default)]
    daily_pnl: i64,
    #[serde(default)]
    positions: Vec<WirePosition>,
}

#[derive(Debug, Deserialize)]
struct WireReceipt {
    order_id: String,
    status: OrderStatus,
    #[serde(default)]
    fill_price: u32,
    #[serde(default)]
    fill_qty: u32,
}

// =============================================================================
// Port implementation
// =============================================================================

#[async_trait]
impl ExchangePort for RestExchange {
    #[instrument(skip(self), name = "exchange::list_open_markets")]
    async fn list_open_markets(&self, limit: usize) -> Result<Vec<Market>, ExchangeError> {
        let qs = self.signed_query(&format!("status=open&limit={limit}"));
        let url = format!("{}/v1/markets?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error("list_open_markets", e))?;

        let wire: WireMarkets = Self::read_json("list_open_markets", resp).await?;
        debug!(count = wire.markets.len(), "markets listed");
        Ok(wire.markets.into_iter().map(Market::from).collect())
    }

    #[instrument(skip(self), name = "exchange::get_order_book")]
    async fn get_order_book(&self, ticker: &str) -> Result<Option<OrderBook>, ExchangeError> {
        let qs = self.signed_query("");
        let url = format!("{}/v1/markets/{}/orderbook?{}", self.base_url, ticker, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error("get_order_book", e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let wire: WireBook = Self::read_json("get_order_book", resp).await?;
        Ok(Some(wire.into()))
    }

    #[instrument(skip(self), name = "exchange::get_portfolio")]
    async fn get_portfolio(&self) -> Result<PortfolioSnapshot, ExchangeError> {
        let qs = self.signed_query("");
        let url = format!("{}/v1/portfolio?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error("get_portfolio", e))?;

        let wire: WirePortfolio = Self::read_json("get_portfolio", resp).await?;

        let mut positions = HashMap::new();
        for p in wire.positions {
            positions.insert(
                p.ticker.clone(),
                Position {
                    ticker: p.ticker,
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                    current_price: p.current_price,
                    unrealized_pnl: p.unrealized_pnl,
                },
            );
        }

        Ok(PortfolioSnapshot {
            cash: wire.cash,
            equity: wire.equity,
            daily_pnl: wire.daily_pnl,
            positions,
            peak_equity: wire.equity,
            drawdown_pct: 0.0,
        })
    }

    #[instrument(
        skip(self, request),
        fields(ticker = %request.ticker, side = %request.side),
        name = "exchange::submit_order"
    )]
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt, ExchangeError> {
        let body = serde_json::json!({
            "ticker": request.ticker,
            "side": request.side,
            "price": request.price,
            "quantity": request.quantity,
            "type": request.order_type,
            "client_id": request.client_id,
        });
        let payload = body.to_string();
        let sig = self.sign(&payload);
        let url = format!("{}/v1/orders", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("X-SIGNATURE", sig)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport_error("submit_order", e))?;

        let wire: WireReceipt = Self::read_json("submit_order", resp).await?;
        debug!(order_id = %wire.order_id, status = ?wire.status, "order submitted");
        Ok(OrderReceipt {
            order_id: wire.order_id,
            status: wire.status,
            fill_price: wire.fill_price,
            fill_qty: wire.fill_qty,
        })
    }

    #[instrument(skip(self), name = "exchange::cancel_order")]
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let qs = self.signed_query("");
        let url = format!("{}/v1/orders/{}?{}", self.base_url, order_id, qs);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error("cancel_order", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body, None));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let client = RestExchange::new("https://example.test", "key", "secret");
        let a = client.sign("status=open&limit=50&timestamp=1");
        let b = client.sign("status=open&limit=50&timestamp=1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        let rate = RestExchange::status_error(StatusCode::TOO_MANY_REQUESTS, "", Some(1500));
        assert_eq!(rate.code(), "RateLimited");

        let perm = RestExchange::status_error(StatusCode::UNPROCESSABLE_ENTITY, "bad price", None);
        assert_eq!(perm.code(), "PermanentError");
        assert!(!perm.is_retriable());

        let transient = RestExchange::status_error(StatusCode::BAD_GATEWAY, "", None);
        assert_eq!(transient.code(), "TransportError");
        assert!(transient.is_retriable());
    }

    #[test]
    fn wire_book_converts_absent_sides() {
        let json = r#"{"ticker":"T","yes_bid":{"price":40,"size":10},"yes_ask":null,"no_bid":null,"no_ask":{"price":62,"size":5}}"#;
        let wire: WireBook = serde_json::from_str(json).unwrap();
        let book: OrderBook = wire.into();
        assert_eq!(book.yes_bid, Some(Level::new(40, 10)));
        assert_eq!(book.yes_ask, None);
        assert_eq!(book.no_ask, Some(Level::new(62, 5)));
    }
}
