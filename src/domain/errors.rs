use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::entities::broker::BrokerId;

/// Failures a broker adapter can report.
///
/// Variants are deliberately coarse but distinguishable: the order router
/// decides per variant whether to retry, fail over to another broker, or
/// abort the request entirely.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum BrokerError {
    /// Session invalid or expired. Triggers a token refresh, not a user error.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Malformed order. Rejected locally, never sent upstream.
    #[error("Order validation failed: {0}")]
    Validation(String),

    /// Upstream broker declined the request. Surfaced verbatim.
    #[error("Broker rejected: {0}")]
    Rejected(String),

    /// Transport-level failure. Retried with backoff.
    #[error("Network error: {0}")]
    Network(String),

    /// Streaming connection dropped and could not be re-established.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Broker-side rate limit hit.
    #[error("Rate limited by broker")]
    RateLimited,

    /// Capability not offered by this broker.
    #[error("{broker} does not support {operation}")]
    NotSupported { broker: String, operation: String },
}

impl BrokerError {
    /// Transient errors are retried; the rest are surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Network(_) | BrokerError::ConnectionLost(_) | BrokerError::RateLimited
        )
    }

    pub fn not_supported(broker: BrokerId, operation: &str) -> Self {
        BrokerError::NotSupported {
            broker: broker.to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Failures of the order router itself, as opposed to a single broker.
#[derive(Debug, Error, Clone)]
pub enum RoutingError {
    #[error("No eligible broker for strategy {strategy}")]
    NoEligibleBroker { strategy: String },

    #[error("Order submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("All brokers failed: {0}")]
    AllBrokersFailed(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

impl<T> From<mpsc::error::SendError<T>> for RoutingError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        RoutingError::ChannelSend(e.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Value must be non-negative")]
    MustBeNonNegative,

    #[error("Value must be finite")]
    MustBeFinite,
}

impl From<ValidationError> for BrokerError {
    fn from(error: ValidationError) -> Self {
        BrokerError::Validation(error.to_string())
    }
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}
