//! FIFO lot book.
//!
//! Tracks the entry lots of one open position and computes realized P&L on
//! closing fills by consuming the oldest open quantity first.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::domain::entities::position::PositionSide;
use crate::domain::value_objects::pnl::PnL;

#[derive(Debug, Clone)]
pub struct Lot {
    pub quantity: f64,
    pub price: f64,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FifoLedger {
    side: PositionSide,
    lots: VecDeque<Lot>,
}

impl FifoLedger {
    pub fn new(side: PositionSide) -> Self {
        FifoLedger {
            side,
            lots: VecDeque::new(),
        }
    }

    pub fn side(&self) -> PositionSide {
        self.side
    }

    pub fn is_flat(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn open_quantity(&self) -> f64 {
        self.lots.iter().map(|lot| lot.quantity).sum()
    }

    /// Volume-weighted average entry price over the open lots.
    pub fn average_price(&self) -> Option<f64> {
        let quantity = self.open_quantity();
        if quantity <= 0.0 {
            return None;
        }
        let notional: f64 = self.lots.iter().map(|lot| lot.quantity * lot.price).sum();
        Some(notional / quantity)
    }

    /// Add an entry lot in the ledger's direction.
    pub fn open(&mut self, quantity: f64, price: f64) {
        if quantity <= 0.0 {
            return;
        }
        self.lots.push_back(Lot {
            quantity,
            price,
            opened_at: Utc::now(),
        });
    }

    /// Close up to `quantity` against the oldest lots at `exit_price`.
    ///
    /// # Returns
    /// `(closed_quantity, realized)`; closed_quantity is less than asked
    /// when the ledger holds less.
    pub fn close(&mut self, quantity: f64, exit_price: f64) -> (f64, PnL) {
        let mut remaining = quantity;
        let mut realized = 0.0;

        while remaining > 0.0 {
            let Some(front) = self.lots.front_mut() else {
                break;
            };
            let closing = remaining.min(front.quantity);
            let per_unit = match self.side {
                PositionSide::Long => exit_price - front.price,
                PositionSide::Short => front.price - exit_price,
            };
            realized += per_unit * closing;
            front.quantity -= closing;
            remaining -= closing;
            if front.quantity <= f64::EPSILON {
                self.lots.pop_front();
            }
        }

        let closed = quantity - remaining;
        (closed, PnL::new(realized).unwrap_or_else(|_| PnL::zero()))
    }
}
