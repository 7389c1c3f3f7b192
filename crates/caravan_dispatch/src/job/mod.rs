pub mod events;
#[allow(clippy::module_inception)]
pub mod job;
pub mod scheduler;
