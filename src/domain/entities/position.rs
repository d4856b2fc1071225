use serde::{Deserialize, Serialize};

use crate::domain::entities::broker::BrokerId;
use crate::domain::entities::exchange::Exchange;
use crate::domain::value_objects::{pnl::PnL, price::Price, quantity::Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// An open position on one broker.
///
/// Unrealized P&L is never stored: it is always recomputed from
/// (last_price, average_price, quantity, side) so a price tick can never
/// leave a stale number behind.
#[derive(Debug, Clone)]
pub struct UnifiedPosition {
    pub broker: BrokerId,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: PositionSide,
    pub quantity: Quantity,
    pub average_price: Price,
    pub last_price: Option<Price>,
    pub realized_pnl: PnL,
}

impl UnifiedPosition {
    pub fn new(
        broker: BrokerId,
        symbol: impl Into<String>,
        exchange: Exchange,
        side: PositionSide,
        quantity: Quantity,
        average_price: Price,
    ) -> Self {
        UnifiedPosition {
            broker,
            symbol: symbol.into(),
            exchange,
            side,
            quantity,
            average_price,
            last_price: None,
            realized_pnl: PnL::zero(),
        }
    }

    pub fn key(&self) -> (BrokerId, String) {
        (self.broker, format!("{}:{}", self.exchange, self.symbol))
    }

    pub fn update_last_price(&mut self, price: Price) {
        self.last_price = Some(price);
    }

    /// Pure function of the position's current inputs. None until a price
    /// has been observed.
    pub fn unrealized_pnl(&self) -> Option<PnL> {
        self.last_price.map(|last| {
            let diff = match self.side {
                PositionSide::Long => last.value() - self.average_price.value(),
                PositionSide::Short => self.average_price.value() - last.value(),
            };
            PnL::new(diff * self.quantity.value()).unwrap_or_else(|_| PnL::zero())
        })
    }

    pub fn total_pnl(&self) -> PnL {
        self.realized_pnl + self.unrealized_pnl().unwrap_or_else(PnL::zero)
    }
}

/// A delivery holding (long-only, settled stock).
#[derive(Debug, Clone)]
pub struct Holding {
    pub broker: BrokerId,
    pub symbol: String,
    pub exchange: Exchange,
    pub quantity: Quantity,
    pub average_price: Price,
    pub last_price: Option<Price>,
}

impl Holding {
    pub fn market_value(&self) -> Option<f64> {
        self.last_price.map(|p| p.value() * self.quantity.value())
    }

    pub fn unrealized_pnl(&self) -> Option<PnL> {
        self.last_price.map(|last| {
            let diff = last.value() - self.average_price.value();
            PnL::new(diff * self.quantity.value()).unwrap_or_else(|_| PnL::zero())
        })
    }
}
