//! Error types for trust tier policy

use thiserror::Error;

/// Trust tier policy error
#[derive(Debug, Error)]
pub enum Error {
    /// Dispute submitted after the eligibility window closed
    #[error("Dispute window expired: {0}")]
    WindowExpired(String),

    /// Dispute reason does not meet the minimum requirements
    #[error("Invalid dispute reason: {0}")]
    InvalidReason(String),

    /// Invalid policy configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
