pub mod circuit_breaker;
pub mod fifo_ledger;
pub mod latency;
pub mod market_hours;
pub mod statistics;
pub mod subscription_registry;
