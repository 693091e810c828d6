pub mod config;
pub mod context;
pub mod core;
pub mod logging;
pub mod store;
