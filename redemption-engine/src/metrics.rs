//! Prometheus metrics for the redemption engine

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, Encoder, Histogram, IntCounter, TextEncoder,
};

lazy_static! {
    pub static ref SESSIONS_CREATED: IntCounter = register_int_counter!(
        "redemption_sessions_created_total",
        "Total redemption sessions created"
    )
    .unwrap();
    pub static ref SESSIONS_APPROVED: IntCounter = register_int_counter!(
        "redemption_sessions_approved_total",
        "Total sessions approved by customers"
    )
    .unwrap();
    pub static ref SESSIONS_CONSUMED: IntCounter = register_int_counter!(
        "redemption_sessions_consumed_total",
        "Total sessions consumed by shops"
    )
    .unwrap();
    pub static ref SESSIONS_EXPIRED: IntCounter = register_int_counter!(
        "redemption_sessions_expired_total",
        "Total sessions expired by the GC sweep"
    )
    .unwrap();
    pub static ref REDEMPTIONS_DENIED: IntCounter = register_int_counter!(
        "redemption_authorizations_denied_total",
        "Total denied redemption authorizations"
    )
    .unwrap();
    pub static ref NO_SHOWS_MARKED: IntCounter = register_int_counter!(
        "noshow_marked_total",
        "Total no-shows recorded"
    )
    .unwrap();
    pub static ref DISPUTES_AUTO_APPROVED: IntCounter = register_int_counter!(
        "noshow_disputes_auto_approved_total",
        "Total first-time disputes auto-approved"
    )
    .unwrap();
    pub static ref REDEEMED_AMOUNT: Histogram = register_histogram!(
        "redemption_amount_rcn",
        "Histogram of redeemed RCN amounts",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]
    )
    .unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn metrics_handler() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = SESSIONS_CREATED.get();
        SESSIONS_CREATED.inc();
        assert_eq!(SESSIONS_CREATED.get(), before + 1);
    }

    #[test]
    fn test_metrics_render() {
        SESSIONS_CONSUMED.inc();
        let body = metrics_handler().unwrap();
        assert!(body.contains("redemption_sessions_consumed_total"));
    }
}
