pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod nats;
pub mod security_middleware;
pub mod services;
pub mod signature;

pub use config::Config;
pub use errors::{RedemptionEngineError, Result};
