//! Market data event shapes.
//!
//! These are the stable contracts every downstream consumer relies on,
//! regardless of which broker a value came from. Adapters normalize their
//! wire formats into these before anything else sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;

/// Depth of data requested on a streaming subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionMode {
    /// Last traded price only.
    Ltp,
    /// Full quote: OHLC, volume, best bid/ask.
    Quote,
    /// Quote plus market depth.
    Full,
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionMode::Ltp => write!(f, "ltp"),
            SubscriptionMode::Quote => write!(f, "quote"),
            SubscriptionMode::Full => write!(f, "full"),
        }
    }
}

/// A normalized price tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub exchange: Exchange,
    pub last_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub change: f64,
    pub change_percent: f64,
    pub bid: f64,
    pub bid_qty: u64,
    pub ask: f64,
    pub ask_qty: u64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Minimal tick carrying only a last traded price. Remaining fields are
    /// zeroed; used by LTP-mode feeds and the paper engine.
    pub fn ltp(symbol: impl Into<String>, exchange: Exchange, last_price: f64) -> Self {
        Tick {
            symbol: symbol.into(),
            exchange,
            last_price,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0,
            change: 0.0,
            change_percent: 0.0,
            bid: 0.0,
            bid_qty: 0,
            ask: 0.0,
            ask_qty: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn spread(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 {
            Some(self.ask - self.bid)
        } else {
            None
        }
    }
}

/// One level of the order book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: u64,
    pub orders: u32,
}

/// Five-level market depth snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDepth {
    pub symbol: String,
    pub exchange: Exchange,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub timestamp: DateTime<Utc>,
}

impl MarketDepth {
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first()
    }
}

/// Events fanned out by the subscription multiplexer.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Tick { broker: BrokerId, tick: Tick },
    Depth { broker: BrokerId, depth: MarketDepth },
    /// Published on the control topic after reconnection permanently fails.
    ConnectionLost { broker: BrokerId, reason: String },
}

impl MarketEvent {
    pub fn broker(&self) -> BrokerId {
        match self {
            MarketEvent::Tick { broker, .. } => *broker,
            MarketEvent::Depth { broker, .. } => *broker,
            MarketEvent::ConnectionLost { broker, .. } => *broker,
        }
    }
}
