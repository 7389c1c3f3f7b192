pub mod memory;
pub mod metrics;
pub mod persister;
pub mod solution;
