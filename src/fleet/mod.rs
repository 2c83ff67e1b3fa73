pub mod accounting;
pub mod config;
pub mod liveness;
pub mod store;
