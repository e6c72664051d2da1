pub mod metrics;
pub mod mnist;
pub mod network;
pub mod optimizer;
pub mod train;
