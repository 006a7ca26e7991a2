// Core modules
pub mod api;
pub mod backtest;
pub mod collector;
pub mod db;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod models;
pub mod publisher;
pub mod strategy;

// Re-export commonly used types
pub use error::BrokerError;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
