//! Dispute window rules for contested no-shows

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};

/// Days after a no-show during which a dispute may be submitted
pub const DISPUTE_WINDOW_DAYS: i64 = 7;

/// Minimum dispute reason length in characters
pub const MIN_REASON_CHARS: usize = 10;

/// Whether a dispute submitted at `now` is within the window opened at
/// `marked_at`
pub fn within_dispute_window(marked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now <= marked_at + Duration::days(DISPUTE_WINDOW_DAYS)
}

/// Check the dispute window, surfacing the deadline on failure
pub fn check_dispute_window(marked_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if within_dispute_window(marked_at, now) {
        Ok(())
    } else {
        Err(Error::WindowExpired(format!(
            "disputes must be submitted within {} days of the no-show (deadline was {})",
            DISPUTE_WINDOW_DAYS,
            (marked_at + Duration::days(DISPUTE_WINDOW_DAYS)).to_rfc3339()
        )))
    }
}

/// Validate a dispute reason
pub fn validate_reason(reason: &str) -> Result<()> {
    if reason.trim().chars().count() < MIN_REASON_CHARS {
        return Err(Error::InvalidReason(format!(
            "reason must be at least {} characters",
            MIN_REASON_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_open_within_seven_days() {
        let marked = Utc::now() - Duration::days(6);
        assert!(within_dispute_window(marked, Utc::now()));
    }

    #[test]
    fn test_window_closed_at_day_eight() {
        let marked = Utc::now() - Duration::days(8);
        assert!(!within_dispute_window(marked, Utc::now()));
        assert!(check_dispute_window(marked, Utc::now()).is_err());
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let now = Utc::now();
        let marked = now - Duration::days(DISPUTE_WINDOW_DAYS);
        assert!(within_dispute_window(marked, now));

        // One second past the deadline fails
        let marked = now - Duration::days(DISPUTE_WINDOW_DAYS) - Duration::seconds(1);
        assert!(!within_dispute_window(marked, now));
    }

    #[test]
    fn test_reason_length() {
        assert!(validate_reason("too short").is_err());
        assert!(validate_reason("   padded   ").is_err());
        assert!(validate_reason("I was hospitalized that day").is_ok());
    }
}
