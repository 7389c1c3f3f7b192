pub mod error;
pub mod job;
pub mod persist;
pub mod pipeline;
pub mod reconcile;
pub mod solver;
