//! Top-level trading service.
//!
//! Explicitly constructed and dependency-injected: owns the auth manager,
//! subscription multiplexer, market data service, order router, state
//! aggregator and paper engine, and wires the event flow between them.
//! Orders go to the paper engine while paper mode is on and to the router
//! otherwise, so callers never branch on the mode themselves.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::application::actors::subscription_multiplexer::SubscriptionMultiplexer;
use crate::application::services::aggregator::StateAggregator;
use crate::application::services::auth_manager::AuthManager;
use crate::application::services::market_data::MarketDataService;
use crate::application::services::order_router::{OrderRouter, RouteReport, RoutingStrategy};
use crate::application::services::paper_trading::PaperTradingEngine;
use crate::config::AppConfig;
use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::entities::order::OrderRequest;
use crate::domain::errors::{BrokerError, RoutingError};
use crate::domain::market_data::{MarketEvent, SubscriptionMode};

/// Where a placed order went.
#[derive(Debug, Clone)]
pub enum PlacementResult {
    /// Simulated fill or resting order in the paper account.
    Paper { order_id: String },
    /// Dispatched to one or more live brokers.
    Live(RouteReport),
}

pub struct TradingService {
    pub auth: Arc<AuthManager>,
    pub multiplexer: Arc<SubscriptionMultiplexer>,
    pub market_data: Arc<MarketDataService>,
    pub router: Arc<OrderRouter>,
    pub aggregator: Arc<StateAggregator>,
    pub paper: Arc<PaperTradingEngine>,
    config: AppConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl TradingService {
    pub fn new(
        auth: Arc<AuthManager>,
        multiplexer: Arc<SubscriptionMultiplexer>,
        market_data: Arc<MarketDataService>,
        router: Arc<OrderRouter>,
        aggregator: Arc<StateAggregator>,
        paper: Arc<PaperTradingEngine>,
        config: AppConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(TradingService {
            auth,
            multiplexer,
            market_data,
            router,
            aggregator,
            paper,
            config,
            shutdown_tx,
        })
    }

    /// Authenticate brokers, start background schedulers, and wire the
    /// tick flow into the cache, aggregator and paper engine.
    pub async fn init(self: &Arc<Self>) {
        let results = self.auth.authenticate_all().await;
        let authenticated = results.values().filter(|r| r.is_ok()).count();
        info!(
            "Authenticated {}/{} brokers",
            authenticated,
            results.len()
        );

        self.auth.spawn_refresh_scheduler();
        let _ = self
            .aggregator
            .spawn_refresh_task(self.config.aggregate_refresh_interval);

        for broker in self.auth.authenticated_brokers().await {
            let watchlist: Vec<(Exchange, String)> = self
                .config
                .symbols
                .iter()
                .flat_map(|(exchange, symbols)| {
                    symbols.iter().map(|s| (*exchange, s.clone()))
                })
                .collect();
            let _ = self.market_data.spawn_poller(broker, watchlist);
        }

        self.spawn_event_pump();
        info!("Trading service initialized");
    }

    /// Forward every multiplexer event into the cache, the aggregator's
    /// position marks and the paper engine.
    fn spawn_event_pump(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut events = self.multiplexer.firehose();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(MarketEvent::Tick { tick, .. }) => {
                            service.market_data.record_tick(&tick).await;
                            service.aggregator.record_tick(&tick).await;
                            service.paper.on_tick(&tick).await;
                        }
                        Ok(MarketEvent::Depth { .. }) => {}
                        Ok(MarketEvent::ConnectionLost { broker, reason }) => {
                            error!("Stream permanently lost for {}: {}", broker, reason);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Event pump lagged, {} events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = shutdown_rx.recv() => return,
                }
            }
        });
    }

    /// Place an order in whichever mode is active.
    pub async fn place_order(
        &self,
        request: &OrderRequest,
        strategy: Option<RoutingStrategy>,
    ) -> Result<PlacementResult, RoutingError> {
        if self.paper.is_enabled() {
            let order_id = self
                .paper
                .place_order(request)
                .await
                .map_err(RoutingError::Broker)?;
            return Ok(PlacementResult::Paper { order_id });
        }
        let report = match strategy {
            Some(strategy) => self.router.route_order(request, strategy).await?,
            None => self.router.smart_route(request).await?,
        };
        Ok(PlacementResult::Live(report))
    }

    /// Cancel on a specific broker, or in the paper account.
    pub async fn cancel_order(&self, broker: BrokerId, order_id: &str) -> Result<(), BrokerError> {
        if broker == BrokerId::Paper {
            return self.paper.cancel_order(order_id).await;
        }
        let adapter = self
            .auth
            .adapter(broker)
            .await
            .ok_or_else(|| BrokerError::Auth(format!("{} is not authenticated", broker)))?;
        adapter.cancel_order(order_id).await
    }

    /// Watch symbols on a broker's stream (or its polling fallback).
    pub async fn watch(
        &self,
        broker: BrokerId,
        symbols: &[(String, Exchange)],
        mode: SubscriptionMode,
    ) -> Result<(), BrokerError> {
        self.multiplexer.subscribe(broker, symbols, mode).await
    }

    pub async fn unwatch(
        &self,
        broker: BrokerId,
        symbols: &[(String, Exchange)],
    ) -> Result<(), BrokerError> {
        self.multiplexer.unsubscribe(broker, symbols).await
    }

    pub async fn shutdown(&self) {
        info!("Trading service shutting down");
        let _ = self.shutdown_tx.send(());
        self.multiplexer.shutdown().await;
        self.market_data.shutdown();
        self.aggregator.shutdown();
        self.auth.shutdown();
    }
}

/// Assemble the full service graph from configuration.
pub fn build(
    config: AppConfig,
    store: Arc<dyn crate::credentials::CredentialStore>,
    adapters: Vec<Arc<dyn crate::domain::repositories::broker_adapter::BrokerAdapter>>,
) -> Arc<TradingService> {
    let mut auth = AuthManager::new(store, config.auth.clone());
    for adapter in adapters {
        auth.register_adapter(adapter);
    }
    let auth = Arc::new(auth);

    let hours = crate::domain::services::market_hours::MarketHours::new(
        config.market_data.open_ttl,
        config.market_data.closed_poll_interval,
        config.market_data.max_closed_ttl,
    );
    let market_data = Arc::new(MarketDataService::new(
        Arc::clone(&auth),
        hours,
        config.market_data.clone(),
    ));
    let multiplexer = SubscriptionMultiplexer::new(Arc::clone(&auth), config.mux.clone());
    let router = Arc::new(OrderRouter::new(
        Arc::clone(&auth),
        Arc::clone(&market_data),
        config.router.clone(),
    ));
    let aggregator = Arc::new(StateAggregator::new(Arc::clone(&auth)));
    let paper = PaperTradingEngine::new(config.paper.clone());

    TradingService::new(auth, multiplexer, market_data, router, aggregator, paper, config)
}
