pub mod subscription_multiplexer;
