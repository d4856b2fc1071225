pub mod aggregator;
pub mod auth_manager;
pub mod market_data;
pub mod order_router;
pub mod paper_trading;
pub mod trading_service;
