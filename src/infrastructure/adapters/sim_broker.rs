//! Simulated broker driver.
//!
//! A self-contained adapter used for local development and tests: quotes
//! follow a bounded random walk, orders fill instantly at the current
//! simulated price, and sessions expire like a real broker's daily token.
//! It has no streaming feed, which also exercises the REST polling path
//! end to end.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::credentials::BrokerCredential;
use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::entities::order::{
    OrderRequest, OrderSide, OrderStatus, OrderType, UnifiedOrder,
};
use crate::domain::entities::position::{Holding, PositionSide, UnifiedPosition};
use crate::domain::errors::BrokerError;
use crate::domain::market_data::{DepthLevel, MarketDepth, Tick};
use crate::domain::repositories::broker_adapter::{
    BrokerAdapter, BrokerResult, BrokerSession, MarginInfo,
};
use crate::domain::value_objects::{price::Price, quantity::Quantity};

const SESSION_LIFETIME_HOURS: i64 = 8;
const DEFAULT_SEED_PRICE: f64 = 1000.0;
const WALK_STEP_FRACTION: f64 = 0.002;

struct SimState {
    prices: HashMap<(Exchange, String), f64>,
    orders: Vec<UnifiedOrder>,
    positions: HashMap<(Exchange, String), UnifiedPosition>,
}

pub struct SimBroker {
    broker: BrokerId,
    state: Mutex<SimState>,
    next_order_id: AtomicU64,
}

impl SimBroker {
    pub fn new(broker: BrokerId) -> Self {
        SimBroker {
            broker,
            state: Mutex::new(SimState {
                prices: HashMap::new(),
                orders: Vec::new(),
                positions: HashMap::new(),
            }),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Pin a starting price for a symbol. Unseeded symbols start at a
    /// fixed default.
    pub fn seed_price(&self, symbol: &str, exchange: Exchange, price: f64) {
        self.state
            .lock()
            .expect("sim state lock")
            .prices
            .insert((exchange, symbol.to_string()), price);
    }

    fn walk_price(state: &mut SimState, symbol: &str, exchange: Exchange) -> f64 {
        let key = (exchange, symbol.to_string());
        let current = *state.prices.get(&key).unwrap_or(&DEFAULT_SEED_PRICE);
        let step = current * WALK_STEP_FRACTION;
        let next = (current + rand::thread_rng().gen_range(-step..=step)).max(0.01);
        state.prices.insert(key, next);
        next
    }
}

#[async_trait]
impl BrokerAdapter for SimBroker {
    fn broker(&self) -> BrokerId {
        self.broker
    }

    async fn authenticate(&self, credential: &BrokerCredential) -> BrokerResult<BrokerSession> {
        if credential.api_key.is_empty() {
            return Err(BrokerError::Auth("Empty API key".to_string()));
        }
        Ok(BrokerSession::new(
            self.broker,
            format!("sim-{}", rand::thread_rng().gen::<u32>()),
            ChronoDuration::hours(SESSION_LIFETIME_HOURS),
        ))
    }

    async fn refresh_session(&self, session: &BrokerSession) -> BrokerResult<BrokerSession> {
        Ok(BrokerSession::new(
            session.broker,
            format!("sim-{}", rand::thread_rng().gen::<u32>()),
            ChronoDuration::hours(SESSION_LIFETIME_HOURS),
        ))
    }

    async fn get_quote(&self, symbol: &str, exchange: Exchange) -> BrokerResult<Tick> {
        let mut state = self.state.lock().expect("sim state lock");
        let last = Self::walk_price(&mut state, symbol, exchange);
        let mut tick = Tick::ltp(symbol, exchange, last);
        tick.bid = last * 0.9995;
        tick.bid_qty = 100;
        tick.ask = last * 1.0005;
        tick.ask_qty = 100;
        tick.open = last;
        tick.high = last;
        tick.low = last;
        tick.close = last;
        Ok(tick)
    }

    async fn get_market_depth(&self, symbol: &str, exchange: Exchange) -> BrokerResult<MarketDepth> {
        let tick = self.get_quote(symbol, exchange).await?;
        let level = |price: f64| DepthLevel {
            price,
            quantity: 100,
            orders: 2,
        };
        Ok(MarketDepth {
            symbol: symbol.to_string(),
            exchange,
            bids: (1..=5).map(|i| level(tick.bid * (1.0 - 0.0005 * i as f64))).collect(),
            asks: (1..=5).map(|i| level(tick.ask * (1.0 + 0.0005 * i as f64))).collect(),
            timestamp: tick.timestamp,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<String> {
        let order_id = format!(
            "{}-{}",
            self.broker.key().to_uppercase(),
            self.next_order_id.fetch_add(1, Ordering::SeqCst)
        );
        let mut state = self.state.lock().expect("sim state lock");
        let fill_price = match (request.order_type, request.price) {
            (OrderType::Limit, Some(price)) => price.value(),
            _ => Self::walk_price(&mut state, &request.symbol, request.exchange),
        };

        let mut order = UnifiedOrder::from_request(self.broker, order_id.clone(), request);
        order.status = OrderStatus::Complete;
        state.orders.push(order);

        // Net the fill into the simulated position book
        let key = (request.exchange, request.symbol.clone());
        let signed = match request.side {
            OrderSide::Buy => request.quantity.value(),
            OrderSide::Sell => -request.quantity.value(),
        };
        let (net, average) = match state.positions.get(&key) {
            Some(existing) => {
                let current = match existing.side {
                    PositionSide::Long => existing.quantity.value(),
                    PositionSide::Short => -existing.quantity.value(),
                };
                let net = current + signed;
                // Average only moves when the position extends
                let average = if net.abs() > current.abs() {
                    (existing.average_price.value() * current.abs()
                        + fill_price * signed.abs())
                        / net.abs().max(f64::EPSILON)
                } else {
                    existing.average_price.value()
                };
                (net, average)
            }
            None => (signed, fill_price),
        };

        if net.abs() < f64::EPSILON {
            state.positions.remove(&key);
        } else {
            let side = if net > 0.0 { PositionSide::Long } else { PositionSide::Short };
            let quantity = Quantity::new(net.abs()).map_err(BrokerError::from)?;
            let average_price = Price::new(average).map_err(BrokerError::from)?;
            state.positions.insert(
                key,
                UnifiedPosition::new(
                    self.broker,
                    request.symbol.clone(),
                    request.exchange,
                    side,
                    quantity,
                    average_price,
                ),
            );
        }
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()> {
        // Sim fills are immediate, so there is never anything to cancel
        Err(BrokerError::Rejected(format!(
            "Order {} already complete",
            order_id
        )))
    }

    async fn orders(&self) -> BrokerResult<Vec<UnifiedOrder>> {
        Ok(self.state.lock().expect("sim state lock").orders.clone())
    }

    async fn positions(&self) -> BrokerResult<Vec<UnifiedPosition>> {
        Ok(self
            .state
            .lock()
            .expect("sim state lock")
            .positions
            .values()
            .cloned()
            .collect())
    }

    async fn holdings(&self) -> BrokerResult<Vec<Holding>> {
        Ok(vec![])
    }

    async fn margins(&self) -> BrokerResult<MarginInfo> {
        Ok(MarginInfo {
            available_cash: 10_000_000.0,
            used_margin: 0.0,
            collateral: 0.0,
        })
    }
}
