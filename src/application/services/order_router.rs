//! Order router.
//!
//! Given an order intent and a routing strategy, selects target broker(s)
//! and dispatches through their adapters. Every successful call feeds the
//! latency tracker; every outcome feeds the per-broker circuit breaker, so
//! a repeatedly failing broker drops out of selection until it recovers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::services::auth_manager::AuthManager;
use crate::application::services::market_data::MarketDataService;
use crate::config::RouterConfig;
use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::order::{OrderRequest, OrderSide};
use crate::domain::errors::{BrokerError, RoutingError};
use crate::domain::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::domain::services::latency::LatencyTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Identical order to every authenticated broker, concurrently.
    Parallel,
    /// Lowest ask for a buy, highest bid for a sell.
    BestPrice,
    /// Lowest EWMA round-trip time.
    BestLatency,
    /// Rotating index over the authenticated list.
    RoundRobin,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingStrategy::Parallel => write!(f, "parallel"),
            RoutingStrategy::BestPrice => write!(f, "best-price"),
            RoutingStrategy::BestLatency => write!(f, "best-latency"),
            RoutingStrategy::RoundRobin => write!(f, "round-robin"),
        }
    }
}

/// Outcome of one dispatch to one broker.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub broker: BrokerId,
    pub result: Result<String, BrokerError>,
    pub round_trip: Duration,
}

/// Result of a routed order. Parallel routing reports partial success
/// explicitly rather than collapsing to a single pass/fail.
#[derive(Debug, Clone)]
pub struct RouteReport {
    pub strategy: RoutingStrategy,
    pub outcomes: Vec<RouteOutcome>,
}

impl RouteReport {
    pub fn successes(&self) -> Vec<&RouteOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok()).collect()
    }

    pub fn failures(&self) -> Vec<&RouteOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err()).collect()
    }
}

pub struct OrderRouter {
    auth: Arc<AuthManager>,
    market_data: Arc<MarketDataService>,
    config: RouterConfig,
    latency: Mutex<LatencyTracker>,
    breakers: Mutex<HashMap<BrokerId, Arc<CircuitBreaker>>>,
    round_robin_cursor: AtomicUsize,
}

impl OrderRouter {
    pub fn new(
        auth: Arc<AuthManager>,
        market_data: Arc<MarketDataService>,
        config: RouterConfig,
    ) -> Self {
        let alpha = config.ewma_alpha;
        OrderRouter {
            auth,
            market_data,
            config,
            latency: Mutex::new(LatencyTracker::new(alpha)),
            breakers: Mutex::new(HashMap::new()),
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    /// Route an order with an explicit strategy, bounded by the overall
    /// submission timeout.
    pub async fn route_order(
        &self,
        request: &OrderRequest,
        strategy: RoutingStrategy,
    ) -> Result<RouteReport, RoutingError> {
        let submit_timeout = self.config.submit_timeout;
        match timeout(submit_timeout, self.route_inner(request, strategy)).await {
            Ok(result) => result,
            Err(_) => Err(RoutingError::Timeout(submit_timeout)),
        }
    }

    /// Pick a strategy automatically: Parallel degenerates to a single
    /// dispatch with one broker; with more, price discovery wins.
    pub async fn smart_route(&self, request: &OrderRequest) -> Result<RouteReport, RoutingError> {
        let strategy = if self.auth.authenticated_brokers().await.len() <= 1 {
            RoutingStrategy::Parallel
        } else {
            RoutingStrategy::BestPrice
        };
        debug!("smart_route selected {}", strategy);
        self.route_order(request, strategy).await
    }

    async fn route_inner(
        &self,
        request: &OrderRequest,
        strategy: RoutingStrategy,
    ) -> Result<RouteReport, RoutingError> {
        match strategy {
            RoutingStrategy::Parallel => self.route_parallel(request).await,
            RoutingStrategy::BestPrice => self.route_best_price(request).await,
            RoutingStrategy::BestLatency => self.route_best_latency(request).await,
            RoutingStrategy::RoundRobin => self.route_round_robin(request).await,
        }
    }

    async fn route_parallel(&self, request: &OrderRequest) -> Result<RouteReport, RoutingError> {
        let brokers = self.auth.authenticated_brokers().await;
        if brokers.is_empty() {
            return Err(RoutingError::NoEligibleBroker {
                strategy: RoutingStrategy::Parallel.to_string(),
            });
        }

        let mut handles = Vec::with_capacity(brokers.len());
        for broker in brokers {
            let request = request.clone();
            let auth = Arc::clone(&self.auth);
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = match auth.adapter(broker).await {
                    Some(adapter) => adapter.place_order(&request).await,
                    None => Err(BrokerError::Auth(format!("{} is not authenticated", broker))),
                };
                RouteOutcome {
                    broker,
                    result,
                    round_trip: started.elapsed(),
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => {
                    self.record_outcome(&outcome).await;
                    outcomes.push(outcome);
                }
                Err(e) => warn!("Parallel dispatch task panicked: {}", e),
            }
        }

        let report = RouteReport {
            strategy: RoutingStrategy::Parallel,
            outcomes,
        };
        if report.successes().is_empty() {
            let summary = report
                .failures()
                .iter()
                .map(|o| format!("{}: {}", o.broker, o.result.as_ref().unwrap_err()))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RoutingError::AllBrokersFailed(summary));
        }
        Ok(report)
    }

    async fn route_best_price(&self, request: &OrderRequest) -> Result<RouteReport, RoutingError> {
        let brokers = self.eligible_brokers().await;
        if brokers.is_empty() {
            return Err(RoutingError::NoEligibleBroker {
                strategy: RoutingStrategy::BestPrice.to_string(),
            });
        }

        // Quote every broker concurrently, each bounded by the quote timeout
        let mut handles = Vec::with_capacity(brokers.len());
        for broker in &brokers {
            let broker = *broker;
            let market_data = Arc::clone(&self.market_data);
            let symbol = request.symbol.clone();
            let exchange = request.exchange;
            let quote_timeout = self.config.quote_timeout;
            handles.push(tokio::spawn(async move {
                let quote = timeout(
                    quote_timeout,
                    market_data.get_quote(broker, &symbol, exchange),
                )
                .await;
                (broker, quote)
            }));
        }

        let mut candidates: Vec<(BrokerId, f64)> = Vec::new();
        for handle in handles {
            let Ok((broker, quote)) = handle.await else {
                continue;
            };
            match quote {
                Ok(Ok(cached)) => {
                    let tick = cached.tick;
                    let price = match request.side {
                        // Buy at the lowest ask, sell at the highest bid;
                        // fall back to last price when the book is empty
                        OrderSide::Buy if tick.ask > 0.0 => tick.ask,
                        OrderSide::Sell if tick.bid > 0.0 => tick.bid,
                        _ => tick.last_price,
                    };
                    candidates.push((broker, price));
                }
                Ok(Err(e)) => debug!("Quote failed for {}: {}", broker, e),
                Err(_) => debug!("Quote timed out for {}", broker),
            }
        }

        if candidates.is_empty() {
            return Err(RoutingError::NoEligibleBroker {
                strategy: RoutingStrategy::BestPrice.to_string(),
            });
        }

        let latency = self.latency.lock().await;
        let better = |a: &(BrokerId, f64), b: &(BrokerId, f64)| -> bool {
            if a.1 != b.1 {
                match request.side {
                    OrderSide::Buy => a.1 < b.1,
                    OrderSide::Sell => a.1 > b.1,
                }
            } else {
                // Tie broken by lower rolling average latency
                latency.ranking_ms(a.0) < latency.ranking_ms(b.0)
            }
        };
        let mut best = candidates[0];
        for candidate in &candidates[1..] {
            if better(candidate, &best) {
                best = *candidate;
            }
        }
        drop(latency);

        info!(
            "Best-price routing {} {} to {} at {}",
            request.side, request.symbol, best.0, best.1
        );
        self.dispatch_single(best.0, request, RoutingStrategy::BestPrice)
            .await
    }

    async fn route_best_latency(&self, request: &OrderRequest) -> Result<RouteReport, RoutingError> {
        let brokers = self.eligible_brokers().await;
        let chosen = {
            let latency = self.latency.lock().await;
            latency.fastest(&brokers)
        };
        let Some(broker) = chosen else {
            return Err(RoutingError::NoEligibleBroker {
                strategy: RoutingStrategy::BestLatency.to_string(),
            });
        };
        self.dispatch_single(broker, request, RoutingStrategy::BestLatency)
            .await
    }

    async fn route_round_robin(&self, request: &OrderRequest) -> Result<RouteReport, RoutingError> {
        let brokers = self.eligible_brokers().await;
        if brokers.is_empty() {
            return Err(RoutingError::NoEligibleBroker {
                strategy: RoutingStrategy::RoundRobin.to_string(),
            });
        }
        // Advances on every call regardless of outcome
        let cursor = self.round_robin_cursor.fetch_add(1, Ordering::SeqCst);
        let broker = brokers[cursor % brokers.len()];
        self.dispatch_single(broker, request, RoutingStrategy::RoundRobin)
            .await
    }

    async fn dispatch_single(
        &self,
        broker: BrokerId,
        request: &OrderRequest,
        strategy: RoutingStrategy,
    ) -> Result<RouteReport, RoutingError> {
        let adapter = self
            .auth
            .adapter(broker)
            .await
            .ok_or_else(|| RoutingError::NoEligibleBroker {
                strategy: strategy.to_string(),
            })?;

        let started = Instant::now();
        let result = adapter.place_order(request).await;
        let outcome = RouteOutcome {
            broker,
            result,
            round_trip: started.elapsed(),
        };
        self.record_outcome(&outcome).await;

        if let Err(e) = &outcome.result {
            return Err(RoutingError::Broker(e.clone()));
        }
        Ok(RouteReport {
            strategy,
            outcomes: vec![outcome],
        })
    }

    /// Authenticated brokers not currently tripped by their circuit breaker.
    async fn eligible_brokers(&self) -> Vec<BrokerId> {
        let mut eligible = Vec::new();
        for broker in self.auth.authenticated_brokers().await {
            if self.breaker(broker).await.is_call_permitted().await {
                eligible.push(broker);
            }
        }
        eligible
    }

    async fn breaker(&self, broker: BrokerId) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(broker)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                    failure_threshold: self.config.breaker_failure_threshold,
                    window: self.config.breaker_window,
                    cooldown: self.config.breaker_cooldown,
                    ..Default::default()
                }))
            })
            .clone()
    }

    /// Feed latency and breaker statistics from one call outcome.
    async fn record_outcome(&self, outcome: &RouteOutcome) {
        let breaker = self.breaker(outcome.broker).await;
        match &outcome.result {
            Ok(_) => {
                self.latency
                    .lock()
                    .await
                    .record(outcome.broker, outcome.round_trip);
                breaker.on_success().await;
            }
            Err(e) => {
                // Only transport-level failures count against the breaker;
                // a validation or rejection is the order's fault
                if e.is_transient() {
                    breaker.on_failure().await;
                } else {
                    breaker.on_success().await;
                }
            }
        }
    }

    /// Test and status hook: current average latency per broker.
    pub async fn latency_snapshot(&self) -> HashMap<BrokerId, f64> {
        let latency = self.latency.lock().await;
        self.auth
            .registered_brokers()
            .into_iter()
            .filter_map(|b| latency.average_ms(b).map(|ms| (b, ms)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, MarketDataConfig};
    use crate::credentials::{BrokerCredential, CredentialStore, MemoryCredentialStore};
    use crate::domain::entities::exchange::Exchange;
    use crate::domain::entities::order::{OrderType, UnifiedOrder};
    use crate::domain::entities::position::{Holding, UnifiedPosition};
    use crate::domain::market_data::{MarketDepth, Tick};
    use crate::domain::repositories::broker_adapter::{
        BrokerAdapter, BrokerResult, BrokerSession,
    };
    use crate::domain::services::market_hours::MarketHours;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    #[derive(Default)]
    struct Behavior {
        ask: f64,
        bid: f64,
        place_delay: Duration,
        fail_with: Option<BrokerError>,
    }

    struct ScriptedAdapter {
        broker: BrokerId,
        behavior: std::sync::Mutex<Behavior>,
        placed: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(broker: BrokerId, behavior: Behavior) -> Arc<Self> {
            Arc::new(ScriptedAdapter {
                broker,
                behavior: std::sync::Mutex::new(behavior),
                placed: AtomicU32::new(0),
            })
        }

        fn set_failure(&self, error: Option<BrokerError>) {
            self.behavior.lock().unwrap().fail_with = error;
        }
    }

    #[async_trait]
    impl BrokerAdapter for ScriptedAdapter {
        fn broker(&self) -> BrokerId {
            self.broker
        }

        async fn authenticate(&self, _c: &BrokerCredential) -> BrokerResult<BrokerSession> {
            Ok(BrokerSession::new(self.broker, "t", ChronoDuration::hours(8)))
        }

        async fn refresh_session(&self, s: &BrokerSession) -> BrokerResult<BrokerSession> {
            Ok(BrokerSession::new(s.broker, "t2", ChronoDuration::hours(8)))
        }

        async fn get_quote(&self, symbol: &str, exchange: Exchange) -> BrokerResult<Tick> {
            let (ask, bid) = {
                let behavior = self.behavior.lock().unwrap();
                (behavior.ask, behavior.bid)
            };
            let mut tick = Tick::ltp(symbol, exchange, (ask + bid) / 2.0);
            tick.ask = ask;
            tick.bid = bid;
            Ok(tick)
        }

        async fn get_market_depth(&self, _s: &str, _e: Exchange) -> BrokerResult<MarketDepth> {
            Err(BrokerError::not_supported(self.broker, "depth"))
        }

        async fn place_order(&self, _r: &OrderRequest) -> BrokerResult<String> {
            let (delay, fail) = {
                let behavior = self.behavior.lock().unwrap();
                (behavior.place_delay, behavior.fail_with.clone())
            };
            tokio::time::sleep(delay).await;
            if let Some(e) = fail {
                return Err(e);
            }
            let n = self.placed.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(format!("{}-{}", self.broker.key(), n))
        }

        async fn cancel_order(&self, _o: &str) -> BrokerResult<()> {
            Ok(())
        }

        async fn orders(&self) -> BrokerResult<Vec<UnifiedOrder>> {
            Ok(vec![])
        }

        async fn positions(&self) -> BrokerResult<Vec<UnifiedPosition>> {
            Ok(vec![])
        }

        async fn holdings(&self) -> BrokerResult<Vec<Holding>> {
            Ok(vec![])
        }
    }

    async fn router_with(adapters: Vec<Arc<ScriptedAdapter>>) -> (Arc<OrderRouter>, Arc<AuthManager>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut auth = AuthManager::new(store.clone(), AuthConfig::default());
        for adapter in &adapters {
            store
                .put(adapter.broker(), BrokerCredential::new("key", "secret-value"))
                .await
                .unwrap();
            auth.register_adapter(adapter.clone());
        }
        let auth = Arc::new(auth);
        for adapter in &adapters {
            auth.authenticate(adapter.broker()).await.unwrap();
        }
        let market_data = Arc::new(MarketDataService::new(
            Arc::clone(&auth),
            MarketHours::default(),
            MarketDataConfig::default(),
        ));
        let router = Arc::new(OrderRouter::new(
            Arc::clone(&auth),
            market_data,
            RouterConfig::default(),
        ));
        (router, auth)
    }

    fn buy(symbol: &str) -> OrderRequest {
        OrderRequest::new(symbol, Exchange::Nse, OrderSide::Buy, OrderType::Market, 10.0, None)
            .unwrap()
    }

    #[tokio::test]
    async fn test_best_price_buy_picks_lowest_ask() {
        let a = ScriptedAdapter::new(
            BrokerId::Zerodha,
            Behavior { ask: 100.50, bid: 100.40, ..Default::default() },
        );
        let b = ScriptedAdapter::new(
            BrokerId::Upstox,
            Behavior { ask: 100.25, bid: 100.15, ..Default::default() },
        );
        let (router, _auth) = router_with(vec![a.clone(), b.clone()]).await;

        let report = router
            .route_order(&buy("INFY"), RoutingStrategy::BestPrice)
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].broker, BrokerId::Upstox);
        assert_eq!(b.placed.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(a.placed.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_best_price_sell_picks_highest_bid() {
        let a = ScriptedAdapter::new(
            BrokerId::Zerodha,
            Behavior { ask: 100.50, bid: 100.40, ..Default::default() },
        );
        let b = ScriptedAdapter::new(
            BrokerId::Upstox,
            Behavior { ask: 100.45, bid: 100.10, ..Default::default() },
        );
        let (router, _auth) = router_with(vec![a.clone(), b]).await;

        let sell = OrderRequest::new(
            "INFY", Exchange::Nse, OrderSide::Sell, OrderType::Market, 10.0, None,
        )
        .unwrap();
        let report = router
            .route_order(&sell, RoutingStrategy::BestPrice)
            .await
            .unwrap();
        assert_eq!(report.outcomes[0].broker, BrokerId::Zerodha);
    }

    #[tokio::test]
    async fn test_parallel_reports_partial_failure() {
        let a = ScriptedAdapter::new(BrokerId::Zerodha, Behavior { ask: 100.0, bid: 99.9, ..Default::default() });
        let b = ScriptedAdapter::new(BrokerId::Upstox, Behavior { ask: 100.0, bid: 99.9, ..Default::default() });
        let c = ScriptedAdapter::new(BrokerId::Fyers, Behavior { ask: 100.0, bid: 99.9, ..Default::default() });
        b.set_failure(Some(BrokerError::Rejected("margin shortfall".to_string())));
        let (router, _auth) = router_with(vec![a, b, c]).await;

        let report = router
            .route_order(&buy("TCS"), RoutingStrategy::Parallel)
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.successes().len(), 2);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].broker, BrokerId::Upstox);
        assert!(matches!(
            failures[0].result,
            Err(BrokerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_parallel_all_failed() {
        let a = ScriptedAdapter::new(BrokerId::Zerodha, Behavior::default());
        a.set_failure(Some(BrokerError::Network("down".to_string())));
        let (router, _auth) = router_with(vec![a]).await;

        let result = router
            .route_order(&buy("TCS"), RoutingStrategy::Parallel)
            .await;
        assert!(matches!(result, Err(RoutingError::AllBrokersFailed(_))));
    }

    #[tokio::test]
    async fn test_round_robin_visits_each_broker_once() {
        let a = ScriptedAdapter::new(BrokerId::Zerodha, Behavior::default());
        let b = ScriptedAdapter::new(BrokerId::Upstox, Behavior::default());
        let c = ScriptedAdapter::new(BrokerId::Fyers, Behavior::default());
        let (router, _auth) = router_with(vec![a.clone(), b.clone(), c.clone()]).await;

        for _ in 0..3 {
            router
                .route_order(&buy("SBIN"), RoutingStrategy::RoundRobin)
                .await
                .unwrap();
        }
        assert_eq!(a.placed.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(b.placed.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(c.placed.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_excludes_failing_broker() {
        let a = ScriptedAdapter::new(BrokerId::Zerodha, Behavior::default());
        let b = ScriptedAdapter::new(BrokerId::Upstox, Behavior::default());
        a.set_failure(Some(BrokerError::Network("flapping".to_string())));
        let (router, _auth) = router_with(vec![a.clone(), b.clone()]).await;

        // Trip Zerodha's breaker with consecutive network failures
        for _ in 0..10 {
            let _ = router
                .route_order(&buy("SBIN"), RoutingStrategy::RoundRobin)
                .await;
        }
        a.set_failure(None);
        a.placed.store(0, AtomicOrdering::SeqCst);
        b.placed.store(0, AtomicOrdering::SeqCst);

        for _ in 0..4 {
            router
                .route_order(&buy("SBIN"), RoutingStrategy::RoundRobin)
                .await
                .unwrap();
        }
        assert_eq!(a.placed.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(b.placed.load(AtomicOrdering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_best_latency_prefers_fast_broker() {
        let fast = ScriptedAdapter::new(BrokerId::Zerodha, Behavior::default());
        let slow = ScriptedAdapter::new(
            BrokerId::Upstox,
            Behavior { place_delay: Duration::from_millis(50), ..Default::default() },
        );
        let (router, _auth) = router_with(vec![fast.clone(), slow.clone()]).await;

        // Seed both averages
        router.route_order(&buy("SBIN"), RoutingStrategy::Parallel).await.unwrap();

        fast.placed.store(0, AtomicOrdering::SeqCst);
        slow.placed.store(0, AtomicOrdering::SeqCst);
        for _ in 0..3 {
            router
                .route_order(&buy("SBIN"), RoutingStrategy::BestLatency)
                .await
                .unwrap();
        }
        assert_eq!(fast.placed.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(slow.placed.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_authenticated_brokers() {
        let (router, auth) = router_with(vec![]).await;
        assert!(auth.authenticated_brokers().await.is_empty());
        let result = router
            .route_order(&buy("SBIN"), RoutingStrategy::RoundRobin)
            .await;
        assert!(matches!(result, Err(RoutingError::NoEligibleBroker { .. })));
    }

    #[tokio::test]
    async fn test_smart_route_single_broker_goes_parallel() {
        let a = ScriptedAdapter::new(BrokerId::Zerodha, Behavior::default());
        let (router, _auth) = router_with(vec![a]).await;
        let report = router.smart_route(&buy("SBIN")).await.unwrap();
        assert_eq!(report.strategy, RoutingStrategy::Parallel);
    }

    #[tokio::test]
    async fn test_smart_route_multi_broker_goes_best_price() {
        let a = ScriptedAdapter::new(
            BrokerId::Zerodha,
            Behavior { ask: 100.0, bid: 99.9, ..Default::default() },
        );
        let b = ScriptedAdapter::new(
            BrokerId::Upstox,
            Behavior { ask: 99.5, bid: 99.4, ..Default::default() },
        );
        let (router, _auth) = router_with(vec![a, b]).await;
        let report = router.smart_route(&buy("SBIN")).await.unwrap();
        assert_eq!(report.strategy, RoutingStrategy::BestPrice);
        assert_eq!(report.outcomes[0].broker, BrokerId::Upstox);
    }

    #[tokio::test]
    async fn test_submission_timeout() {
        let slow = ScriptedAdapter::new(
            BrokerId::Zerodha,
            Behavior { place_delay: Duration::from_secs(30), ..Default::default() },
        );
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .put(BrokerId::Zerodha, BrokerCredential::new("key", "secret-value"))
            .await
            .unwrap();
        let mut auth = AuthManager::new(store, AuthConfig::default());
        auth.register_adapter(slow.clone());
        let auth = Arc::new(auth);
        auth.authenticate(BrokerId::Zerodha).await.unwrap();
        let market_data = Arc::new(MarketDataService::new(
            Arc::clone(&auth),
            MarketHours::default(),
            MarketDataConfig::default(),
        ));
        let config = RouterConfig {
            submit_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let router = OrderRouter::new(auth, market_data, config);

        let result = router
            .route_order(&buy("SBIN"), RoutingStrategy::RoundRobin)
            .await;
        assert!(matches!(result, Err(RoutingError::Timeout(_))));
    }
}
