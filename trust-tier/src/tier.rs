//! Tier derivation and booking restriction rules
//!
//! Tiers are never stored: every read recomputes them from the audit
//! fields on the no-show record, so views cannot drift out of sync.

use crate::types::{NoShowTier, TierRestrictions, TierStatus};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Redemption multiplier applied from `Caution` upward
const RESTRICTED_MULTIPLIER: Decimal = dec!(0.8);

/// Tier policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Days a booking suspension lasts from the triggering no-show
    pub suspension_days: i64,

    /// Successful appointments required at `DepositRequired` or above
    /// before the tier steps down one band
    pub deescalation_threshold: u32,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            suspension_days: 30,
            deescalation_threshold: 3,
        }
    }
}

/// Derive the raw tier from a no-show count
pub fn tier_for(no_show_count: u32) -> NoShowTier {
    match no_show_count {
        0 => NoShowTier::Normal,
        1 => NoShowTier::Warning,
        2 => NoShowTier::Caution,
        3 | 4 => NoShowTier::DepositRequired,
        _ => NoShowTier::Suspended,
    }
}

/// Restrictions attached to each tier
pub fn restrictions_for(tier: NoShowTier) -> TierRestrictions {
    match tier {
        NoShowTier::Normal | NoShowTier::Warning => TierRestrictions {
            can_book: true,
            minimum_advance_hours: 0,
            requires_deposit: false,
            redemption_multiplier: Decimal::ONE,
            restrictions: Vec::new(),
        },
        NoShowTier::Caution => TierRestrictions {
            can_book: true,
            minimum_advance_hours: 24,
            requires_deposit: false,
            redemption_multiplier: RESTRICTED_MULTIPLIER,
            restrictions: vec![
                "24-hour advance booking required".to_string(),
                "Limited to 80% RCN redemption per booking".to_string(),
            ],
        },
        NoShowTier::DepositRequired => TierRestrictions {
            can_book: true,
            minimum_advance_hours: 48,
            requires_deposit: true,
            redemption_multiplier: RESTRICTED_MULTIPLIER,
            restrictions: vec![
                "48-hour advance booking required".to_string(),
                "Deposit required for bookings".to_string(),
                "Limited to 80% RCN redemption per booking".to_string(),
            ],
        },
        NoShowTier::Suspended => TierRestrictions {
            can_book: false,
            minimum_advance_hours: 48,
            requires_deposit: true,
            redemption_multiplier: RESTRICTED_MULTIPLIER,
            restrictions: vec![
                "48-hour advance booking required".to_string(),
                "Deposit required for bookings".to_string(),
                "Limited to 80% RCN redemption per booking".to_string(),
            ],
        },
    }
}

/// Derive the full trust status from stored record fields
///
/// `deescalated` shifts the derived tier one band down without rewriting
/// the no-show count, which stays intact as an audit trail. A suspension
/// only blocks booking while `now` is before its end; the remaining
/// suspended-tier restrictions stay in force afterwards.
pub fn derive_status(
    no_show_count: u32,
    deescalated: bool,
    last_no_show_at: Option<DateTime<Utc>>,
    policy: &TierPolicy,
    now: DateTime<Utc>,
) -> TierStatus {
    let mut tier = tier_for(no_show_count);
    if deescalated {
        tier = tier.stepped_down();
    }

    let booking_suspended_until = match (tier, last_no_show_at) {
        (NoShowTier::Suspended, Some(at)) => Some(at + Duration::days(policy.suspension_days)),
        _ => None,
    };

    let mut restrictions = restrictions_for(tier);
    if tier == NoShowTier::Suspended {
        match booking_suspended_until {
            Some(until) if now < until => {
                restrictions
                    .restrictions
                    .insert(0, format!("Booking suspended until {}", until.to_rfc3339()));
            }
            _ => {
                // Suspension lapsed; booking reopens under the remaining
                // deposit and advance-notice requirements.
                restrictions.can_book = true;
            }
        }
    }

    TierStatus {
        tier,
        no_show_count,
        restrictions,
        booking_suspended_until,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(tier_for(0), NoShowTier::Normal);
        assert_eq!(tier_for(1), NoShowTier::Warning);
        assert_eq!(tier_for(2), NoShowTier::Caution);
        assert_eq!(tier_for(3), NoShowTier::DepositRequired);
        assert_eq!(tier_for(4), NoShowTier::DepositRequired);
        assert_eq!(tier_for(5), NoShowTier::Suspended);
        assert_eq!(tier_for(12), NoShowTier::Suspended);
    }

    #[test]
    fn test_restriction_table() {
        let normal = restrictions_for(NoShowTier::Normal);
        assert!(normal.can_book);
        assert_eq!(normal.minimum_advance_hours, 0);
        assert!(!normal.requires_deposit);
        assert_eq!(normal.redemption_multiplier, Decimal::ONE);

        let caution = restrictions_for(NoShowTier::Caution);
        assert!(caution.can_book);
        assert_eq!(caution.minimum_advance_hours, 24);
        assert!(!caution.requires_deposit);
        assert_eq!(caution.redemption_multiplier, dec!(0.8));

        let deposit = restrictions_for(NoShowTier::DepositRequired);
        assert_eq!(deposit.minimum_advance_hours, 48);
        assert!(deposit.requires_deposit);

        let suspended = restrictions_for(NoShowTier::Suspended);
        assert!(!suspended.can_book);
        assert!(suspended.requires_deposit);
    }

    #[test]
    fn test_deescalation_steps_down_one_band() {
        let now = Utc::now();
        let status = derive_status(3, true, Some(now), &TierPolicy::default(), now);
        assert_eq!(status.tier, NoShowTier::Caution);
        // Audit count is untouched
        assert_eq!(status.no_show_count, 3);
    }

    #[test]
    fn test_suspension_blocks_booking_until_end() {
        let policy = TierPolicy::default();
        let last_no_show = Utc::now() - Duration::days(10);
        let now = Utc::now();

        let status = derive_status(5, false, Some(last_no_show), &policy, now);
        assert_eq!(status.tier, NoShowTier::Suspended);
        assert!(!status.restrictions.can_book);

        let until = status.booking_suspended_until.unwrap();
        assert_eq!(until, last_no_show + Duration::days(30));
    }

    #[test]
    fn test_suspension_lapses_after_period() {
        let policy = TierPolicy::default();
        let last_no_show = Utc::now() - Duration::days(45);
        let now = Utc::now();

        let status = derive_status(5, false, Some(last_no_show), &policy, now);
        assert_eq!(status.tier, NoShowTier::Suspended);
        // Suspension window has passed; booking reopens with deposit rules
        assert!(status.restrictions.can_book);
        assert!(status.restrictions.requires_deposit);
    }

    #[test]
    fn test_stepped_down_floor() {
        assert_eq!(NoShowTier::Normal.stepped_down(), NoShowTier::Normal);
        assert_eq!(NoShowTier::Warning.stepped_down(), NoShowTier::Normal);
        assert_eq!(NoShowTier::Suspended.stepped_down(), NoShowTier::DepositRequired);
    }
}
