//! Core types for the trust tier policy

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// No-show trust tier, escalating with missed appointments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoShowTier {
    /// No restrictions
    Normal,
    /// One no-show on record
    Warning,
    /// Advance booking and redemption cap apply
    Caution,
    /// Deposit required in addition to caution restrictions
    DepositRequired,
    /// Booking blocked until the suspension period ends
    Suspended,
}

impl NoShowTier {
    /// Step the tier down one band (used by de-escalation)
    pub fn stepped_down(self) -> Self {
        match self {
            NoShowTier::Normal | NoShowTier::Warning => NoShowTier::Normal,
            NoShowTier::Caution => NoShowTier::Warning,
            NoShowTier::DepositRequired => NoShowTier::Caution,
            NoShowTier::Suspended => NoShowTier::DepositRequired,
        }
    }
}

/// Customer earning tier derived from lifetime earnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EarningTier {
    /// Lifetime earnings below 200 RCN
    Bronze,
    /// Lifetime earnings of 200 RCN or more
    Silver,
    /// Lifetime earnings of 1000 RCN or more
    Gold,
}

impl EarningTier {
    /// Derive the earning tier from lifetime earnings
    ///
    /// Recomputed on every read so the stored balance can never drift
    /// from the displayed tier.
    pub fn from_lifetime_earnings(lifetime: Decimal) -> Self {
        if lifetime >= Decimal::from(1000) {
            EarningTier::Gold
        } else if lifetime >= Decimal::from(200) {
            EarningTier::Silver
        } else {
            EarningTier::Bronze
        }
    }
}

/// Booking and redemption restrictions derived from a tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRestrictions {
    /// Whether the customer may book at all
    pub can_book: bool,

    /// Minimum hours between booking and appointment
    pub minimum_advance_hours: u32,

    /// Whether a deposit is required to book
    pub requires_deposit: bool,

    /// Multiplier applied to the customer's redemption cap
    pub redemption_multiplier: Decimal,

    /// Human-readable restriction descriptions for display
    pub restrictions: Vec<String>,
}

/// Derived trust status for a customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStatus {
    /// Effective tier after any de-escalation credit
    pub tier: NoShowTier,

    /// Raw no-show count (audit trail, never rewritten by de-escalation)
    pub no_show_count: u32,

    /// Restrictions derived from the effective tier
    pub restrictions: TierRestrictions,

    /// End of the booking suspension, when suspended
    pub booking_suspended_until: Option<DateTime<Utc>>,
}

/// Dispute lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    /// First-ever dispute, approved without review
    AutoApproved,
    /// Awaiting manual shop review
    Pending,
    /// Approved by the shop
    Approved,
    /// Rejected by the shop
    Rejected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_earning_tier_thresholds() {
        assert_eq!(EarningTier::from_lifetime_earnings(dec!(0)), EarningTier::Bronze);
        assert_eq!(EarningTier::from_lifetime_earnings(dec!(199.99)), EarningTier::Bronze);
        assert_eq!(EarningTier::from_lifetime_earnings(dec!(200)), EarningTier::Silver);
        assert_eq!(EarningTier::from_lifetime_earnings(dec!(999)), EarningTier::Silver);
        assert_eq!(EarningTier::from_lifetime_earnings(dec!(1000)), EarningTier::Gold);
    }
}
