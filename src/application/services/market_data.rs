//! Market data cache and polling fallback.
//!
//! For each (exchange, symbol) this service decides between trusting push
//! data (market open) and REST polling (market closed), with TTLs derived
//! from the market-hours policy. A single-flight guard ensures at most one
//! in-flight fetch per key; concurrent callers wait on the same result
//! instead of issuing duplicates.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, warn};

use crate::application::services::auth_manager::AuthManager;
use crate::config::MarketDataConfig;
use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::errors::BrokerError;
use crate::domain::market_data::Tick;
use crate::domain::services::market_hours::MarketHours;
use crate::rate_limit::DirectLimiter;

pub type QuoteKey = (Exchange, String);

/// A cache read. `is_stale` is set when the value is older than its TTL and
/// was served only because a live fetch failed.
#[derive(Debug, Clone)]
pub struct CachedQuote {
    pub tick: Tick,
    pub fetched_at: DateTime<Utc>,
    pub is_stale: bool,
}

struct CacheEntry {
    tick: Tick,
    fetched_at: DateTime<Utc>,
}

pub struct MarketDataService {
    auth: Arc<AuthManager>,
    hours: MarketHours,
    config: MarketDataConfig,
    cache: Mutex<LruCache<QuoteKey, CacheEntry>>,
    in_flight: Mutex<HashMap<QuoteKey, Vec<oneshot::Sender<Result<Tick, BrokerError>>>>>,
    poll_limiter: DirectLimiter,
    shutdown_tx: broadcast::Sender<()>,
}

impl MarketDataService {
    pub fn new(auth: Arc<AuthManager>, hours: MarketHours, config: MarketDataConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).expect("non-zero capacity");
        let (shutdown_tx, _) = broadcast::channel(1);
        MarketDataService {
            auth,
            hours,
            config,
            cache: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            poll_limiter: crate::rate_limit::per_second(10),
            shutdown_tx,
        }
    }

    /// Record a pushed tick. The push path keeps the cache hot while the
    /// market is open so readers rarely hit REST at all.
    pub async fn record_tick(&self, tick: &Tick) {
        let key = (tick.exchange, tick.symbol.clone());
        self.cache.lock().await.put(
            key,
            CacheEntry {
                tick: tick.clone(),
                fetched_at: Utc::now(),
            },
        );
    }

    pub async fn invalidate(&self, exchange: Exchange, symbol: &str) {
        self.cache
            .lock()
            .await
            .pop(&(exchange, symbol.to_string()));
    }

    /// Read a quote through the cache, fetching from `broker` on a miss.
    ///
    /// Freshness is judged against the market-hours-derived TTL. A stale
    /// value is returned (flagged) only when the live fetch fails.
    pub async fn get_quote(
        &self,
        broker: BrokerId,
        symbol: &str,
        exchange: Exchange,
    ) -> Result<CachedQuote, BrokerError> {
        let key: QuoteKey = (exchange, symbol.to_string());
        let now = Utc::now();
        let ttl = self.hours.policy(exchange, now).cache_ttl;

        if let Some(entry) = self.cache.lock().await.get(&key) {
            let age = (now - entry.fetched_at).to_std().unwrap_or_default();
            if age <= ttl {
                return Ok(CachedQuote {
                    tick: entry.tick.clone(),
                    fetched_at: entry.fetched_at,
                    is_stale: false,
                });
            }
        }

        match self.fetch_single_flight(broker, key.clone()).await {
            Ok(tick) => Ok(CachedQuote {
                tick,
                fetched_at: Utc::now(),
                is_stale: false,
            }),
            Err(e) => {
                // Fall back to the stale cached value when one exists
                if let Some(entry) = self.cache.lock().await.get(&key) {
                    warn!(
                        "Live quote fetch failed for {} {} ({}); serving stale cache",
                        exchange, symbol, e
                    );
                    return Ok(CachedQuote {
                        tick: entry.tick.clone(),
                        fetched_at: entry.fetched_at,
                        is_stale: true,
                    });
                }
                Err(e)
            }
        }
    }

    /// Coalesce concurrent fetches for the same key into one adapter call.
    async fn fetch_single_flight(
        &self,
        broker: BrokerId,
        key: QuoteKey,
    ) -> Result<Tick, BrokerError> {
        let waiter = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(waiters) = in_flight.get_mut(&key) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            } else {
                in_flight.insert(key.clone(), Vec::new());
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("Joining in-flight fetch for {} {}", key.0, key.1);
            return rx
                .await
                .map_err(|_| BrokerError::Network("in-flight fetch dropped".to_string()))?;
        }

        let result = self.fetch_now(broker, &key).await;

        let waiters = self
            .in_flight
            .lock()
            .await
            .remove(&key)
            .unwrap_or_default();
        for tx in waiters {
            let _ = tx.send(result.clone());
        }
        result
    }

    async fn fetch_now(&self, broker: BrokerId, key: &QuoteKey) -> Result<Tick, BrokerError> {
        let adapter = self
            .auth
            .adapter(broker)
            .await
            .ok_or_else(|| BrokerError::Auth(format!("{} is not authenticated", broker)))?;

        self.poll_limiter.until_ready().await;
        let tick = adapter.get_quote(&key.1, key.0).await?;
        self.cache.lock().await.put(
            key.clone(),
            CacheEntry {
                tick: tick.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(tick)
    }

    /// Background poll loop for a fixed watchlist. Only fetches keys the
    /// push path does not cover (market closed) whose cache has gone cold.
    pub fn spawn_poller(
        self: &Arc<Self>,
        broker: BrokerId,
        watchlist: Vec<(Exchange, String)>,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown_rx = service.shutdown_tx.subscribe();
            loop {
                let now = Utc::now();
                let interval = watchlist
                    .iter()
                    .map(|(exchange, _)| service.hours.policy(*exchange, now).poll_interval)
                    .min()
                    .unwrap_or(service.config.closed_poll_interval);

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.recv() => {
                        debug!("Poller stopped for {}", broker);
                        return;
                    }
                }

                for (exchange, symbol) in &watchlist {
                    let policy = service.hours.policy(*exchange, Utc::now());
                    if policy.prefer_push {
                        continue;
                    }
                    if let Err(e) = service.get_quote(broker, symbol, *exchange).await {
                        debug!("Poll fetch failed for {} {}: {}", exchange, symbol, e);
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
