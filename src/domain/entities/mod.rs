pub mod broker;
pub mod exchange;
pub mod order;
pub mod position;
