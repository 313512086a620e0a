//! Trust tier policy for the RCN loyalty network
//!
//! No-show trust tiers, booking restrictions, and dispute window rules

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispute;
pub mod error;
pub mod tier;
pub mod types;

pub use dispute::{validate_reason, within_dispute_window, DISPUTE_WINDOW_DAYS};
pub use error::{Error, Result};
pub use tier::{derive_status, restrictions_for, tier_for, TierPolicy};
pub use types::*;
