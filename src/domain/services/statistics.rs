//! Trading performance statistics.
//!
//! Recomputed incrementally after every closing fill. The profit factor is
//! undefined while there are no losing trades and is reported as "N/A"
//! rather than a fabricated number.

use serde::Serialize;

use crate::domain::value_objects::pnl::PnL;

/// One closed round trip.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub symbol: String,
    pub pnl: PnL,
    /// Entry notional, used to express the trade as a fractional return.
    pub entry_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeStatistics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// wins / total closed trades, 0.0..=1.0
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// None while there are no losing trades; rendered as "N/A"
    pub profit_factor: Option<f64>,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
    pub kelly_fraction: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub net_pnl: f64,
    #[serde(skip)]
    returns: Vec<f64>,
    #[serde(skip)]
    cumulative_pnl: f64,
    #[serde(skip)]
    peak_pnl: f64,
}

impl Default for TradeStatistics {
    fn default() -> Self {
        TradeStatistics {
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            profit_factor: None,
            avg_win: 0.0,
            avg_loss: 0.0,
            expectancy: 0.0,
            kelly_fraction: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            net_pnl: 0.0,
            returns: Vec::new(),
            cumulative_pnl: 0.0,
            peak_pnl: 0.0,
        }
    }
}

impl TradeStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one closed trade into every derived figure.
    pub fn record_trade(&mut self, trade: &ClosedTrade) {
        let pnl = trade.pnl.value();
        self.total_trades += 1;
        self.net_pnl += pnl;

        if trade.pnl.is_profit() {
            self.winning_trades += 1;
            self.gross_profit += pnl;
        } else if trade.pnl.is_loss() {
            self.losing_trades += 1;
            self.gross_loss += pnl.abs();
        }

        self.win_rate = self.winning_trades as f64 / self.total_trades as f64;
        self.avg_win = if self.winning_trades > 0 {
            self.gross_profit / self.winning_trades as f64
        } else {
            0.0
        };
        self.avg_loss = if self.losing_trades > 0 {
            self.gross_loss / self.losing_trades as f64
        } else {
            0.0
        };
        self.profit_factor = if self.gross_loss > 0.0 {
            Some(self.gross_profit / self.gross_loss)
        } else {
            None
        };

        self.expectancy = self.avg_win * self.win_rate - self.avg_loss * (1.0 - self.win_rate);
        self.kelly_fraction = if self.avg_loss > 0.0 && self.avg_win > 0.0 {
            let payoff = self.avg_win / self.avg_loss;
            (self.win_rate - (1.0 - self.win_rate) / payoff).max(0.0)
        } else {
            0.0
        };

        if trade.entry_value > 0.0 {
            self.returns.push(pnl / trade.entry_value);
        }
        self.sharpe_ratio = sharpe(&self.returns);

        // Drawdown on the cumulative realized equity curve
        self.cumulative_pnl += pnl;
        if self.cumulative_pnl > self.peak_pnl {
            self.peak_pnl = self.cumulative_pnl;
        }
        let drawdown = self.peak_pnl - self.cumulative_pnl;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }

    /// "N/A" when undefined, otherwise two decimals.
    pub fn profit_factor_display(&self) -> String {
        match self.profit_factor {
            Some(pf) => format!("{:.2}", pf),
            None => "N/A".to_string(),
        }
    }
}

fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev
}
