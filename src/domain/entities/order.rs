use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Lifecycle of an order as seen by this client.
///
/// Transitions are monotonic: an order never moves backwards (a COMPLETE
/// order cannot become PENDING again), which keeps the aggregate view
/// consistent when brokers replay or reorder status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Complete,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Open => 1,
            OrderStatus::PartiallyFilled => 2,
            OrderStatus::Complete => 3,
            OrderStatus::Cancelled => 3,
            OrderStatus::Rejected => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Open => write!(f, "OPEN"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Complete => write!(f, "COMPLETE"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// An order intent before it has been accepted by any broker.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub price: Option<Price>,
}

impl OrderRequest {
    pub fn new(
        symbol: impl Into<String>,
        exchange: Exchange,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<Self, ValidationError> {
        let symbol = symbol.into();
        if symbol.is_empty() || symbol.len() > 32 {
            return Err(ValidationError::InvalidSymbol(symbol));
        }
        let quantity = Quantity::new(quantity)?;
        if quantity.is_zero() {
            return Err(ValidationError::InvalidQuantity(
                "quantity must be positive".to_string(),
            ));
        }
        let price = match price {
            Some(p) => Some(Price::new(p)?),
            None => None,
        };
        if order_type == OrderType::Limit && price.is_none() {
            return Err(ValidationError::InvalidPrice(
                "limit orders must carry a price".to_string(),
            ));
        }
        Ok(OrderRequest {
            symbol,
            exchange,
            side,
            order_type,
            quantity,
            price,
        })
    }
}

/// An order as tracked across brokers. Identity is the (broker, order_id)
/// pair; order ids from different brokers may collide.
#[derive(Debug, Clone)]
pub struct UnifiedOrder {
    pub broker: BrokerId,
    pub order_id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UnifiedOrder {
    pub fn from_request(broker: BrokerId, order_id: impl Into<String>, request: &OrderRequest) -> Self {
        let now = Utc::now();
        UnifiedOrder {
            broker,
            order_id: order_id.into(),
            symbol: request.symbol.clone(),
            exchange: request.exchange,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> (BrokerId, String) {
        (self.broker, self.order_id.clone())
    }

    /// Apply a status update, enforcing monotonicity. Backward transitions
    /// are rejected so stale updates cannot corrupt the aggregate view.
    pub fn apply_status(&mut self, status: OrderStatus) -> Result<(), String> {
        if !self.status.can_transition_to(status) {
            return Err(format!(
                "Illegal order transition {} -> {} for {}",
                self.status, status, self.order_id
            ));
        }
        if self.status != status {
            self.status = status;
            self.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(order_type: OrderType, price: Option<f64>) -> Result<OrderRequest, ValidationError> {
        OrderRequest::new("RELIANCE", Exchange::Nse, OrderSide::Buy, order_type, 10.0, price)
    }

    #[test]
    fn test_market_request_valid() {
        let req = request(OrderType::Market, None).unwrap();
        assert_eq!(req.symbol, "RELIANCE");
        assert!(req.price.is_none());
    }

    #[test]
    fn test_limit_request_requires_price() {
        assert!(matches!(
            request(OrderType::Limit, None),
            Err(ValidationError::InvalidPrice(_))
        ));
        assert!(request(OrderType::Limit, Some(2500.0)).is_ok());
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let req = OrderRequest::new("TCS", Exchange::Nse, OrderSide::Sell, OrderType::Market, 0.0, None);
        assert!(matches!(req, Err(ValidationError::InvalidQuantity(_))));
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let req = OrderRequest::new("", Exchange::Nse, OrderSide::Buy, OrderType::Market, 1.0, None);
        assert!(matches!(req, Err(ValidationError::InvalidSymbol(_))));
    }

    #[test]
    fn test_status_forward_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Open));
        assert!(OrderStatus::Open.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Complete));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Rejected));
    }

    #[test]
    fn test_status_backward_transitions_rejected() {
        assert!(!OrderStatus::Complete.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Open));
        assert!(!OrderStatus::Open.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_apply_status_enforces_monotonicity() {
        let req = request(OrderType::Market, None).unwrap();
        let mut order = UnifiedOrder::from_request(BrokerId::Zerodha, "ord-1", &req);
        order.apply_status(OrderStatus::Open).unwrap();
        order.apply_status(OrderStatus::Complete).unwrap();
        assert!(order.apply_status(OrderStatus::Pending).is_err());
        assert_eq!(order.status, OrderStatus::Complete);
    }

    #[test]
    fn test_apply_same_status_is_noop() {
        let req = request(OrderType::Market, None).unwrap();
        let mut order = UnifiedOrder::from_request(BrokerId::Upstox, "ord-2", &req);
        let before = order.updated_at;
        order.apply_status(OrderStatus::Pending).unwrap();
        assert_eq!(order.updated_at, before);
    }
}
