pub mod mapping;
pub mod reconciler;
