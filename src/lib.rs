//! dalali: multi-broker trading orchestration core.
//!
//! Coordinates trading across independent brokerage back-ends behind one
//! consistent view of orders, positions and live prices: adapter seam,
//! auth/token refresh, subscription multiplexing with a market-hours-aware
//! polling fallback, strategy-driven order routing, cross-broker state
//! aggregation and a paper trading engine.

pub mod application;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod infrastructure;
pub mod rate_limit;
