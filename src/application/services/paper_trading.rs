//! Paper trading engine.
//!
//! A fully self-contained simulated account used interchangeably with live
//! trading. Market orders fill immediately at the last observed price plus
//! a slippage allowance; limit orders rest until a tick crosses their
//! threshold and then fill at the triggering price. Realized P&L uses FIFO
//! lot matching, and statistics are refolded after every closing fill.
//!
//! Balance only moves on realized fills or an explicit reset, so the
//! account invariant `equity == balance + Σ unrealized` holds at all times.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PaperConfig;
use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::entities::order::{
    OrderRequest, OrderSide, OrderStatus, OrderType, UnifiedOrder,
};
use crate::domain::entities::position::{PositionSide, UnifiedPosition};
use crate::domain::errors::BrokerError;
use crate::domain::market_data::Tick;
use crate::domain::services::fifo_ledger::FifoLedger;
use crate::domain::services::statistics::{ClosedTrade, TradeStatistics};
use crate::domain::value_objects::{pnl::PnL, price::Price, quantity::Quantity};

type SymbolKey = (Exchange, String);

struct PaperPosition {
    ledger: FifoLedger,
    realized: f64,
}

struct PaperState {
    balance: f64,
    positions: HashMap<SymbolKey, PaperPosition>,
    open_orders: HashMap<String, UnifiedOrder>,
    order_history: Vec<UnifiedOrder>,
    last_prices: HashMap<SymbolKey, f64>,
    statistics: TradeStatistics,
}

impl PaperState {
    fn new(balance: f64) -> Self {
        PaperState {
            balance,
            positions: HashMap::new(),
            open_orders: HashMap::new(),
            order_history: Vec::new(),
            last_prices: HashMap::new(),
            statistics: TradeStatistics::new(),
        }
    }
}

pub struct PaperTradingEngine {
    config: PaperConfig,
    enabled: AtomicBool,
    next_order_id: AtomicU64,
    state: Mutex<PaperState>,
}

impl PaperTradingEngine {
    pub fn new(config: PaperConfig) -> Arc<Self> {
        let initial = config.initial_balance;
        Arc::new(PaperTradingEngine {
            config,
            enabled: AtomicBool::new(false),
            next_order_id: AtomicU64::new(1),
            state: Mutex::new(PaperState::new(initial)),
        })
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("Paper trading enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("Paper trading disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn allocate_order_id(&self) -> String {
        // rand suffix keeps ids unique across resets
        let seq = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let salt: u16 = rand::random();
        format!("PPR-{}-{:04x}", seq, salt)
    }

    /// Submit a simulated order.
    ///
    /// Market orders need a previously observed price; without one the
    /// order is rejected rather than filled at a fabricated level.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        let order_id = self.allocate_order_id();
        let mut state = self.state.lock().await;
        let key: SymbolKey = (request.exchange, request.symbol.clone());
        let mut order = UnifiedOrder::from_request(BrokerId::Paper, order_id.clone(), request);

        match request.order_type {
            OrderType::Market => {
                let Some(last) = state.last_prices.get(&key).copied() else {
                    order.status = OrderStatus::Rejected;
                    state.order_history.push(order);
                    return Err(BrokerError::Rejected(format!(
                        "No market data observed for {}:{}",
                        request.exchange, request.symbol
                    )));
                };
                let paying = request.side == OrderSide::Buy;
                let fill_price = Price::new(last)
                    .and_then(|p| p.with_slippage(self.config.slippage, paying))
                    .map_err(BrokerError::from)?;
                Self::fill(&mut state, &mut order, fill_price.value())?;
                state.order_history.push(order);
                Ok(order_id)
            }
            OrderType::Limit => {
                // Rest until a tick crosses the limit
                debug!(
                    "Paper limit order {} resting: {} {} @ {:?}",
                    order_id, request.side, request.symbol, request.price
                );
                state.open_orders.insert(order_id.clone(), order);
                Ok(order_id)
            }
        }
    }

    /// Cancel a resting order. Unknown or already-filled ids are an error.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let Some(mut order) = state.open_orders.remove(order_id) else {
            return Err(BrokerError::Rejected(format!(
                "No open paper order {}",
                order_id
            )));
        };
        order
            .apply_status(OrderStatus::Cancelled)
            .map_err(BrokerError::Validation)?;
        state.order_history.push(order);
        Ok(())
    }

    /// Feed one tick: refresh marks and trigger any crossed limit orders.
    pub async fn on_tick(&self, tick: &Tick) {
        if tick.last_price <= 0.0 {
            return;
        }
        let mut state = self.state.lock().await;
        let key: SymbolKey = (tick.exchange, tick.symbol.clone());
        state.last_prices.insert(key.clone(), tick.last_price);

        // Collect crossed orders first; filling mutates state
        let crossed: Vec<String> = state
            .open_orders
            .iter()
            .filter(|(_, order)| {
                order.symbol == tick.symbol
                    && order.exchange == tick.exchange
                    && Self::limit_crossed(order, tick.last_price)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for order_id in crossed {
            if let Some(mut order) = state.open_orders.remove(&order_id) {
                // Fills at the triggering price, not the limit price
                if let Err(e) = Self::fill(&mut state, &mut order, tick.last_price) {
                    debug!("Paper limit fill failed for {}: {}", order_id, e);
                }
                state.order_history.push(order);
            }
        }
    }

    fn limit_crossed(order: &UnifiedOrder, price: f64) -> bool {
        let Some(limit) = order.price else {
            return false;
        };
        match order.side {
            OrderSide::Buy => price <= limit.value(),
            OrderSide::Sell => price >= limit.value(),
        }
    }

    /// Apply a fill to the account: open or close FIFO lots, realize P&L
    /// into the balance, fold statistics, mark the order complete.
    fn fill(state: &mut PaperState, order: &mut UnifiedOrder, price: f64) -> Result<(), BrokerError> {
        let key: SymbolKey = (order.exchange, order.symbol.clone());
        let mut remaining = order.quantity.value();
        let opening_side = match order.side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };

        // First close any open quantity on the opposite side
        let mut flatten = false;
        if let Some(position) = state.positions.get_mut(&key) {
            if position.ledger.side() != opening_side && !position.ledger.is_flat() {
                let entry_average = position.ledger.average_price().unwrap_or(price);
                let (closed, realized) = position.ledger.close(remaining, price);
                if closed > 0.0 {
                    position.realized += realized.value();
                    state.balance += realized.value();
                    state.statistics.record_trade(&ClosedTrade {
                        symbol: order.symbol.clone(),
                        pnl: realized,
                        entry_value: entry_average * closed,
                    });
                    debug!(
                        "Paper close {} x{} @ {} realized {}",
                        order.symbol, closed, price, realized
                    );
                }
                remaining -= closed;
                flatten = position.ledger.is_flat();
            }
        }
        if flatten && remaining <= f64::EPSILON {
            state.positions.remove(&key);
        }

        // Any remainder opens (or extends) a position in the order's direction
        if remaining > f64::EPSILON {
            let position = state
                .positions
                .entry(key)
                .or_insert_with(|| PaperPosition {
                    ledger: FifoLedger::new(opening_side),
                    realized: 0.0,
                });
            if position.ledger.is_flat() && position.ledger.side() != opening_side {
                // Direction flip after a full close
                position.ledger = FifoLedger::new(opening_side);
            }
            position.ledger.open(remaining, price);
        }

        order
            .apply_status(OrderStatus::Complete)
            .map_err(BrokerError::Validation)?;
        Ok(())
    }

    /// Cash balance. Changes only on realized fills or reset.
    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    /// Balance plus the sum of unrealized P&L over open positions.
    pub async fn equity(&self) -> f64 {
        let state = self.state.lock().await;
        let unrealized: f64 = state
            .positions
            .iter()
            .map(|(key, position)| Self::unrealized_of(&state, key, position))
            .sum();
        state.balance + unrealized
    }

    fn unrealized_of(state: &PaperState, key: &SymbolKey, position: &PaperPosition) -> f64 {
        let Some(last) = state.last_prices.get(key).copied() else {
            return 0.0;
        };
        let Some(average) = position.ledger.average_price() else {
            return 0.0;
        };
        let diff = match position.ledger.side() {
            PositionSide::Long => last - average,
            PositionSide::Short => average - last,
        };
        diff * position.ledger.open_quantity()
    }

    pub async fn positions(&self) -> Vec<UnifiedPosition> {
        let state = self.state.lock().await;
        state
            .positions
            .iter()
            .filter(|(_, p)| !p.ledger.is_flat())
            .filter_map(|((exchange, symbol), position)| {
                let average = position.ledger.average_price()?;
                let mut unified = UnifiedPosition::new(
                    BrokerId::Paper,
                    symbol.clone(),
                    *exchange,
                    position.ledger.side(),
                    Quantity::new(position.ledger.open_quantity()).ok()?,
                    Price::new(average).ok()?,
                );
                unified.realized_pnl = PnL::new(position.realized).unwrap_or_else(|_| PnL::zero());
                if let Some(last) = state.last_prices.get(&(*exchange, symbol.clone())) {
                    if let Ok(price) = Price::new(*last) {
                        unified.update_last_price(price);
                    }
                }
                Some(unified)
            })
            .collect()
    }

    /// Open orders followed by the completed/cancelled history.
    pub async fn orders(&self) -> Vec<UnifiedOrder> {
        let state = self.state.lock().await;
        let mut orders: Vec<UnifiedOrder> = state.open_orders.values().cloned().collect();
        orders.extend(state.order_history.iter().cloned());
        orders
    }

    pub async fn open_order_count(&self) -> usize {
        self.state.lock().await.open_orders.len()
    }

    pub async fn statistics(&self) -> TradeStatistics {
        self.state.lock().await.statistics.clone()
    }

    /// Atomically wipe the account back to a clean state: positions closed,
    /// pending orders cancelled, balance and statistics reinitialized.
    pub async fn reset_account(&self, initial_balance: f64) -> Result<(), BrokerError> {
        if !initial_balance.is_finite() || initial_balance < 0.0 {
            return Err(BrokerError::Validation(format!(
                "Invalid initial balance: {}",
                initial_balance
            )));
        }
        let mut state = self.state.lock().await;
        *state = PaperState::new(initial_balance);
        info!("Paper account reset to balance {}", initial_balance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Arc<PaperTradingEngine> {
        PaperTradingEngine::new(PaperConfig {
            initial_balance: 1_000_000.0,
            slippage: 0.0,
        })
    }

    fn market(side: OrderSide, quantity: f64) -> OrderRequest {
        OrderRequest::new("INFY", Exchange::Nse, side, OrderType::Market, quantity, None).unwrap()
    }

    fn limit(side: OrderSide, quantity: f64, price: f64) -> OrderRequest {
        OrderRequest::new("INFY", Exchange::Nse, side, OrderType::Limit, quantity, Some(price))
            .unwrap()
    }

    async fn tick(engine: &PaperTradingEngine, price: f64) {
        engine.on_tick(&Tick::ltp("INFY", Exchange::Nse, price)).await;
    }

    async fn assert_equity_invariant(engine: &PaperTradingEngine) {
        let balance = engine.balance().await;
        let unrealized: f64 = engine
            .positions()
            .await
            .iter()
            .filter_map(|p| p.unrealized_pnl().map(|pnl| pnl.value()))
            .sum();
        let equity = engine.equity().await;
        assert!(
            (equity - (balance + unrealized)).abs() < 1e-6,
            "equity {} != balance {} + unrealized {}",
            equity,
            balance,
            unrealized
        );
    }

    #[tokio::test]
    async fn test_market_order_without_data_rejected() {
        let engine = engine();
        let result = engine.place_order(&market(OrderSide::Buy, 10.0)).await;
        assert!(matches!(result, Err(BrokerError::Rejected(_))));
        let orders = engine.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn test_market_order_fills_at_last_price() {
        let engine = engine();
        tick(&engine, 1500.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();

        let positions = engine.positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].average_price.value(), 1500.0);
        assert_eq!(positions[0].quantity.value(), 10.0);
        // Balance untouched by an opening fill
        assert_eq!(engine.balance().await, 1_000_000.0);
        assert_equity_invariant(&engine).await;
    }

    #[tokio::test]
    async fn test_market_buy_applies_slippage() {
        let engine = PaperTradingEngine::new(PaperConfig {
            initial_balance: 1_000_000.0,
            slippage: 0.001,
        });
        tick(&engine, 1000.0).await;
        engine.place_order(&market(OrderSide::Buy, 1.0)).await.unwrap();
        let positions = engine.positions().await;
        assert!((positions[0].average_price.value() - 1001.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_limit_buy_rests_until_crossed() {
        let engine = engine();
        tick(&engine, 101.0).await;
        let order_id = engine
            .place_order(&limit(OrderSide::Buy, 10.0, 100.0))
            .await
            .unwrap();

        // Still pending while price is above the limit
        assert_eq!(engine.open_order_count().await, 1);
        tick(&engine, 100.5).await;
        assert_eq!(engine.open_order_count().await, 1);

        // Crosses: fills at the triggering price, not the limit price
        tick(&engine, 99.5).await;
        assert_eq!(engine.open_order_count().await, 0);
        let positions = engine.positions().await;
        assert_eq!(positions[0].average_price.value(), 99.5);

        let orders = engine.orders().await;
        let filled = orders.iter().find(|o| o.order_id == order_id).unwrap();
        assert_eq!(filled.status, OrderStatus::Complete);
        assert_equity_invariant(&engine).await;
    }

    #[tokio::test]
    async fn test_limit_sell_crosses_upward() {
        let engine = engine();
        tick(&engine, 100.0).await;
        engine.place_order(&market(OrderSide::Buy, 5.0)).await.unwrap();
        engine
            .place_order(&limit(OrderSide::Sell, 5.0, 105.0))
            .await
            .unwrap();

        tick(&engine, 104.0).await;
        assert_eq!(engine.open_order_count().await, 1);

        tick(&engine, 106.0).await;
        assert_eq!(engine.open_order_count().await, 0);
        // Closed at 106: realized (106-100)*5
        assert!((engine.balance().await - 1_000_030.0).abs() < 1e-6);
        assert!(engine.positions().await.is_empty());
        assert_equity_invariant(&engine).await;
    }

    #[tokio::test]
    async fn test_fifo_realized_pnl_across_lots() {
        let engine = engine();
        tick(&engine, 100.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();
        tick(&engine, 110.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();

        // Sell 15: FIFO closes 10 @ (120-100) and 5 @ (120-110)
        tick(&engine, 120.0).await;
        engine.place_order(&market(OrderSide::Sell, 15.0)).await.unwrap();

        assert!((engine.balance().await - 1_000_250.0).abs() < 1e-6);
        let positions = engine.positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity.value(), 5.0);
        assert_eq!(positions[0].average_price.value(), 110.0);
        assert_equity_invariant(&engine).await;
    }

    #[tokio::test]
    async fn test_oversell_flips_to_short() {
        let engine = engine();
        tick(&engine, 100.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();

        tick(&engine, 105.0).await;
        engine.place_order(&market(OrderSide::Sell, 15.0)).await.unwrap();

        let positions = engine.positions().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Short);
        assert_eq!(positions[0].quantity.value(), 5.0);
        assert_eq!(positions[0].average_price.value(), 105.0);
        // Realized on the closed 10: (105-100)*10
        assert!((engine.balance().await - 1_000_050.0).abs() < 1e-6);
        assert_equity_invariant(&engine).await;
    }

    #[tokio::test]
    async fn test_equity_tracks_unrealized() {
        let engine = engine();
        tick(&engine, 200.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();

        tick(&engine, 210.0).await;
        assert!((engine.equity().await - 1_000_100.0).abs() < 1e-6);
        tick(&engine, 190.0).await;
        assert!((engine.equity().await - 999_900.0).abs() < 1e-6);
        assert_eq!(engine.balance().await, 1_000_000.0);
        assert_equity_invariant(&engine).await;
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let engine = engine();
        tick(&engine, 101.0).await;
        let order_id = engine
            .place_order(&limit(OrderSide::Buy, 10.0, 100.0))
            .await
            .unwrap();
        engine.cancel_order(&order_id).await.unwrap();
        assert_eq!(engine.open_order_count().await, 0);

        let orders = engine.orders().await;
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
        // Cancelling again is an error, not a crash
        assert!(engine.cancel_order(&order_id).await.is_err());
    }

    #[tokio::test]
    async fn test_statistics_after_round_trips() {
        let engine = engine();
        tick(&engine, 100.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();
        tick(&engine, 110.0).await;
        engine.place_order(&market(OrderSide::Sell, 10.0)).await.unwrap();

        tick(&engine, 110.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();
        tick(&engine, 105.0).await;
        engine.place_order(&market(OrderSide::Sell, 10.0)).await.unwrap();

        let stats = engine.statistics().await;
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.win_rate - 0.5).abs() < 1e-9);
        // 100 profit vs 50 loss
        assert!((stats.profit_factor.unwrap() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reset_account_round_trip() {
        let engine = engine();
        tick(&engine, 100.0).await;
        engine.place_order(&market(OrderSide::Buy, 10.0)).await.unwrap();
        engine
            .place_order(&limit(OrderSide::Buy, 5.0, 90.0))
            .await
            .unwrap();

        engine.reset_account(1_000_000.0).await.unwrap();
        assert_eq!(engine.balance().await, 1_000_000.0);
        assert!(engine.positions().await.is_empty());
        assert!(engine.orders().await.is_empty());
        assert_eq!(engine.statistics().await.total_trades, 0);
    }

    #[tokio::test]
    async fn test_reset_rejects_invalid_balance() {
        let engine = engine();
        assert!(engine.reset_account(f64::NAN).await.is_err());
        assert!(engine.reset_account(-5.0).await.is_err());
    }

    #[tokio::test]
    async fn test_enable_disable() {
        let engine = engine();
        assert!(!engine.is_enabled());
        engine.enable();
        assert!(engine.is_enabled());
        engine.disable();
        assert!(!engine.is_enabled());
    }
}
