//! Broker Adapter Trait
//!
//! This module defines the `BrokerAdapter` trait, the single seam between
//! broker-specific drivers and the orchestration layer. Routing,
//! aggregation and subscription management depend only on this contract,
//! never on any one broker's field names, so new brokers plug in without
//! touching the rest of the system.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::entities::order::{OrderRequest, UnifiedOrder};
use crate::domain::entities::position::{Holding, UnifiedPosition};
use crate::domain::errors::BrokerError;
use crate::domain::market_data::{MarketDepth, MarketEvent, SubscriptionMode, Tick};
use crate::credentials::BrokerCredential;

/// Common result type for adapter operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// An authenticated session with one broker.
///
/// Created by `authenticate`, renewed only by the token refresh scheduler,
/// destroyed on explicit disconnect or irrecoverable auth failure.
#[derive(Debug, Clone)]
pub struct BrokerSession {
    pub broker: BrokerId,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub authenticated: bool,
}

impl BrokerSession {
    pub fn new(broker: BrokerId, token: impl Into<String>, lifetime: Duration) -> Self {
        let now = Utc::now();
        BrokerSession {
            broker,
            token: token.into(),
            issued_at: now,
            expires_at: now + lifetime,
            authenticated: true,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.issued_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Account funds snapshot.
#[derive(Debug, Clone, Default)]
pub struct MarginInfo {
    pub available_cash: f64,
    pub used_margin: f64,
    pub collateral: f64,
}

/// Wire codec for a broker's streaming feed.
///
/// The multiplexer owns the physical WebSocket connection; the adapter
/// supplies the endpoint and how to speak its dialect. Frame contents are
/// the adapter's business end to end.
pub trait StreamProtocol: Send + Sync {
    /// WebSocket endpoint to connect to.
    fn endpoint(&self) -> String;

    /// Frame registering interest in a batch of symbols, if one is needed.
    fn subscribe_frame(&self, symbols: &[(String, Exchange)], mode: SubscriptionMode)
        -> Option<String>;

    /// Frame dropping interest in a batch of symbols.
    fn unsubscribe_frame(&self, symbols: &[(String, Exchange)]) -> Option<String>;

    /// Parse one inbound text frame into a normalized event.
    fn parse_frame(&self, raw: &str) -> Option<MarketEvent>;

    /// Optional application-level heartbeat.
    fn heartbeat_frame(&self) -> Option<String> {
        None
    }
}

/// Capability contract every broker driver implements.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn broker(&self) -> BrokerId;

    /// Exchange credentials for a session token.
    async fn authenticate(&self, credential: &BrokerCredential) -> BrokerResult<BrokerSession>;

    /// Renew a session before it expires. Must not disturb in-flight calls.
    async fn refresh_session(&self, session: &BrokerSession) -> BrokerResult<BrokerSession>;

    async fn get_quote(&self, symbol: &str, exchange: Exchange) -> BrokerResult<Tick>;

    async fn get_market_depth(&self, symbol: &str, exchange: Exchange)
        -> BrokerResult<MarketDepth>;

    /// Place an order.
    ///
    /// # Returns
    /// The broker-assigned order id.
    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<String>;

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<()>;

    async fn orders(&self) -> BrokerResult<Vec<UnifiedOrder>>;

    async fn positions(&self) -> BrokerResult<Vec<UnifiedPosition>>;

    async fn holdings(&self) -> BrokerResult<Vec<Holding>>;

    async fn margins(&self) -> BrokerResult<MarginInfo> {
        Err(BrokerError::not_supported(self.broker(), "margins"))
    }

    /// Streaming codec, when the broker offers a push feed. Brokers without
    /// one are served by the REST polling fallback.
    fn stream_protocol(&self) -> Option<Arc<dyn StreamProtocol>> {
        None
    }
}
