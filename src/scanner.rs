// =============================================================================
// Scanner — parallel market discovery with caching
// =============================================================================
//
// One scan produces the cycle's candidate (Market, OrderBook) list:
//
//   1. Market list from cache (key "markets") or the exchange.
//   2. Pre-filter: open markets with real volume and open interest.
//   3. Missing books fetched with bounded concurrency, 1 s deadline each.
//   4. Candidates returned ranked; failed tickers dropped for the cycle.
//
// Workers only fetch; every cache write happens on the calling task after
// the fan-out completes, so the caches keep a single writer.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use tracing::{debug, warn};

use crate::cache::MarketCache;
use crate::config::{BotConfig, ScannerConfig};
use crate::errors::EngineError;
use crate::exchange::ExchangePort;
use crate::market::{Market, OrderBook, ScannedMarket};
use crate::types::MarketStatus;

/// Cache key for the global market list.
const MARKET_LIST_KEY: &str = "markets";

/// Deadline for a single order-book fetch.
const BOOK_FETCH_DEADLINE: Duration = Duration::from_secs(1);

/// Markets below these activity floors are not worth evaluating.
const MIN_VOLUME: u64 = 100;
const MIN_OPEN_INTEREST: u64 = 50;

/// The two scanner-owned cache instances.
pub struct ScanCaches {
    pub market_list: MarketCache<Vec<Market>>,
    pub books: MarketCache<OrderBook>,
}

impl ScanCaches {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            market_list: MarketCache::new(
                Duration::from_secs(config.cache.markets_ttl_seconds),
                config.cache.max_size,
            ),
            books: MarketCache::new(
                Duration::from_secs(config.cache.opportunity_ttl_seconds),
                config.cache.max_size,
            ),
        }
    }
}

/// Parallel market discovery.
#[derive(Debug, Clone)]
pub struct Scanner {
    concurrency: usize,
    market_limit: usize,
}

impl Scanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            concurrency: config.concurrency.clamp(1, 64),
            market_limit: config.market_limit.clamp(1, 500),
        }
    }

    /// Produce the ranked candidate list for this cycle.
    ///
    /// A failed market-list fetch aborts the scan (the cycle is skipped);
    /// a failed per-ticker book fetch only drops that ticker.
    pub async fn scan(
        &self,
        exchange: &dyn ExchangePort,
        caches: &mut ScanCaches,
    ) -> Result<Vec<ScannedMarket>, EngineError> {
        // ── 1. Market list (cached) ─────────────────────────────────────
        let markets = match caches.market_list.get(MARKET_LIST_KEY) {
            Some(cached) => cached,
            None => {
                let fresh = exchange.list_open_markets(self.market_limit).await?;
                caches.market_list.put(MARKET_LIST_KEY, fresh.clone())?;
                fresh
            }
        };

        // ── 2. Pre-filter and rank ──────────────────────────────────────
        let mut candidates: Vec<Market> = markets
            .into_iter()
            .filter(|m| {
                m.status == MarketStatus::Open
                    && m.volume > MIN_VOLUME
                    && m.open_interest > MIN_OPEN_INTEREST
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.volume
                .cmp(&a.volume)
                .then(b.open_interest.cmp(&a.open_interest))
                .then(a.ticker.cmp(&b.ticker))
        });

        // ── 3. Books: cache hits first, bounded fan-out for the rest ────
        let mut books: HashMap<String, OrderBook> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for market in &candidates {
            match caches.books.get(&market.ticker) {
                Some(book) => {
                    books.insert(market.ticker.clone(), book);
                }
                None => missing.push(market.ticker.clone()),
            }
        }

        let fetched: Vec<(String, Result<Option<OrderBook>, EngineError>)> =
            stream::iter(missing)
                .map(|ticker| {
                    async move {
                        let result = tokio::time::timeout(
                            BOOK_FETCH_DEADLINE,
                            exchange.get_order_book(&ticker),
                        )
                        .await;
                        let result = match result {
                            Ok(Ok(book)) => Ok(book),
                            Ok(Err(e)) => Err(EngineError::from(e)),
                            Err(_) => Err(EngineError::from(
                                crate::errors::ExchangeError::DeadlineExceeded {
                                    operation: "get_order_book",
                                    deadline_ms: BOOK_FETCH_DEADLINE.as_millis() as u64,
                                },
                            )),
                        };
                        (ticker, result)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        // ── 4. Single-writer cache population after the fan-out ─────────
        for (ticker, result) in fetched {
            match result {
                Ok(Some(book)) => {
                    caches.books.put(&ticker, book.clone())?;
                    books.insert(ticker, book);
                }
                Ok(None) => {
                    debug!(ticker, "no book for ticker — dropped this cycle");
                }
                Err(e) => {
                    warn!(ticker, error = %e, "book fetch failed — ticker dropped this cycle");
                }
            }
        }

        let scanned: Vec<ScannedMarket> = candidates
            .into_iter()
            .filter_map(|market| {
                books.get(&market.ticker).map(|book| ScannedMarket {
                    market,
                    book: book.clone(),
                })
            })
            .collect();

        debug!(count = scanned.len(), "scan complete");
        Ok(scanned)
    }
}
