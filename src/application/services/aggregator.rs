//! State aggregator.
//!
//! Merges every broker's orders, positions and holdings into one aggregate
//! view keyed by (broker, id) so identifiers from different brokers can
//! never collide. The public accessors are pure projections over the latest
//! per-broker state; nothing here is cached independently of its source.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::application::services::auth_manager::AuthManager;
use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::order::UnifiedOrder;
use crate::domain::entities::position::{Holding, UnifiedPosition};
use crate::domain::market_data::Tick;
use crate::domain::value_objects::pnl::PnL;
use crate::domain::value_objects::price::Price;

/// Latest state pulled from one broker.
#[derive(Debug, Clone, Default)]
struct BrokerSnapshot {
    orders: HashMap<String, UnifiedOrder>,
    positions: Vec<UnifiedPosition>,
    holdings: Vec<Holding>,
    /// Set when the last refresh failed; previous data is retained.
    degraded: bool,
    refreshed_at: Option<DateTime<Utc>>,
}

pub struct StateAggregator {
    auth: Arc<AuthManager>,
    state: RwLock<HashMap<BrokerId, BrokerSnapshot>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StateAggregator {
    pub fn new(auth: Arc<AuthManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        StateAggregator {
            auth,
            state: RwLock::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Pull fresh state from every authenticated broker concurrently. One
    /// broker failing marks only its own snapshot degraded; the previous
    /// data for that broker is kept and everyone else is unaffected.
    pub async fn refresh(&self) {
        let brokers = self.auth.authenticated_brokers().await;
        let fetches = brokers.iter().map(|broker| {
            let broker = *broker;
            let auth = Arc::clone(&self.auth);
            async move {
                let Some(adapter) = auth.adapter(broker).await else {
                    return (broker, Err("not authenticated".to_string()));
                };
                let orders = adapter.orders().await;
                let positions = adapter.positions().await;
                let holdings = adapter.holdings().await;
                match (orders, positions, holdings) {
                    (Ok(orders), Ok(positions), Ok(holdings)) => {
                        (broker, Ok((orders, positions, holdings)))
                    }
                    (o, p, h) => {
                        let error = [o.err().map(|e| e.to_string()),
                                     p.err().map(|e| e.to_string()),
                                     h.err().map(|e| e.to_string())]
                            .into_iter()
                            .flatten()
                            .collect::<Vec<_>>()
                            .join("; ");
                        (broker, Err(error))
                    }
                }
            }
        });

        for (broker, result) in join_all(fetches).await {
            let mut state = self.state.write().await;
            let snapshot = state.entry(broker).or_default();
            match result {
                Ok((orders, positions, holdings)) => {
                    Self::merge_orders(snapshot, orders);
                    snapshot.positions = positions;
                    snapshot.holdings = holdings;
                    snapshot.degraded = false;
                    snapshot.refreshed_at = Some(Utc::now());
                }
                Err(e) => {
                    warn!("State refresh failed for {}: {}", broker, e);
                    snapshot.degraded = true;
                }
            }
        }
    }

    /// Apply incoming orders through the monotonic status machine. A stale
    /// poll result can never move an order backwards.
    fn merge_orders(snapshot: &mut BrokerSnapshot, incoming: Vec<UnifiedOrder>) {
        for order in incoming {
            match snapshot.orders.get_mut(&order.order_id) {
                Some(existing) => {
                    if let Err(e) = existing.apply_status(order.status) {
                        debug!("Ignoring stale order update: {}", e);
                    }
                }
                None => {
                    snapshot.orders.insert(order.order_id.clone(), order);
                }
            }
        }
    }

    /// Mark matching positions and holdings to the latest traded price.
    pub async fn record_tick(&self, tick: &Tick) {
        let Ok(price) = Price::new(tick.last_price) else {
            return;
        };
        let mut state = self.state.write().await;
        for snapshot in state.values_mut() {
            for position in &mut snapshot.positions {
                if position.symbol == tick.symbol && position.exchange == tick.exchange {
                    position.update_last_price(price);
                }
            }
            for holding in &mut snapshot.holdings {
                if holding.symbol == tick.symbol && holding.exchange == tick.exchange {
                    holding.last_price = Some(price);
                }
            }
        }
    }

    pub async fn all_orders(&self) -> Vec<UnifiedOrder> {
        let state = self.state.read().await;
        let mut orders: Vec<UnifiedOrder> = state
            .values()
            .flat_map(|s| s.orders.values().cloned())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    pub async fn all_positions(&self) -> Vec<UnifiedPosition> {
        self.state
            .read()
            .await
            .values()
            .flat_map(|s| s.positions.iter().cloned())
            .collect()
    }

    pub async fn all_holdings(&self) -> Vec<Holding> {
        self.state
            .read()
            .await
            .values()
            .flat_map(|s| s.holdings.iter().cloned())
            .collect()
    }

    /// Aggregate P&L: Σ (realized + unrealized) over all positions.
    pub async fn total_pnl(&self) -> PnL {
        self.state
            .read()
            .await
            .values()
            .flat_map(|s| s.positions.iter())
            .map(|p| p.total_pnl())
            .sum()
    }

    pub async fn degraded_brokers(&self) -> Vec<BrokerId> {
        self.state
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.degraded)
            .map(|(b, _)| *b)
            .collect()
    }

    /// Periodic refresh task.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown_rx = aggregator.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => aggregator.refresh().await,
                    _ = shutdown_rx.recv() => return,
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
