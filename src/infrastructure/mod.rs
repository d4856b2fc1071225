pub mod adapters;
pub mod stream_worker;
