use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Redemption session status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Used,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Approved => "approved",
            SessionStatus::Rejected => "rejected",
            SessionStatus::Expired => "expired",
            SessionStatus::Used => "used",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "approved" => Some(SessionStatus::Approved),
            "rejected" => Some(SessionStatus::Rejected),
            "expired" => Some(SessionStatus::Expired),
            "used" => Some(SessionStatus::Used),
            _ => None,
        }
    }

    /// Terminal states are permanent; no transition leaves them
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Rejected | SessionStatus::Expired | SessionStatus::Used
        )
    }
}

/// Redemption session row: the shared mailbox between shop and customer
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RedemptionSession {
    pub id: Uuid,
    pub customer_address: String,
    pub shop_id: String,
    pub max_amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
}

impl RedemptionSession {
    /// Status with lazy expiry applied: a pending or approved session past
    /// its deadline reads as expired before any transition is considered
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        let status = SessionStatus::parse(&self.status).unwrap_or(SessionStatus::Expired);
        match status {
            SessionStatus::Pending | SessionStatus::Approved if now >= self.expires_at => {
                SessionStatus::Expired
            }
            other => other,
        }
    }

    /// Canonical message the customer signs to approve this session
    ///
    /// Binds session id, amount, and shop so a signature cannot be replayed
    /// against a different session or amount.
    pub fn signing_message(&self) -> String {
        format!("redeem:{}:{}:{}", self.id, self.max_amount, self.shop_id)
    }

    /// Payload rendered as a QR code on the shop device
    pub fn qr_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "sessionId": self.id,
            "shopId": self.shop_id,
            "maxAmount": self.max_amount,
            "expiresAt": self.expires_at,
        })
    }
}

/// Immutable transaction record appended at consumption
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RedemptionTransaction {
    pub id: Uuid,
    pub tx_type: String,
    pub customer_address: String,
    pub shop_id: String,
    pub amount: Decimal,
    pub token_source: String,
    pub is_cross_shop: bool,
    pub status: String,
    pub session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// No-show record row, one per customer
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NoShowRecord {
    pub customer_address: String,
    pub no_show_count: i32,
    pub deescalated: bool,
    pub successful_since_tier3: i32,
    pub last_no_show_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// No-show event row, one per missed appointment, keyed by booking order
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NoShowEvent {
    pub order_id: String,
    pub customer_address: String,
    pub marked_at: DateTime<Utc>,
}

/// Dispute row, at most one per no-show event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Dispute {
    pub order_id: String,
    pub customer_address: String,
    pub reason: String,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Redemption verification / session creation request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRedemptionRequest {
    #[validate(length(min = 1))]
    pub customer_address: String,
    #[validate(length(min = 1))]
    pub shop_id: String,
    pub amount: Decimal,
}

/// Session approval request carrying the customer's signature
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveSessionRequest {
    pub signature: String,
}

/// No-show marking request from the booking collaborator
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct MarkNoShowRequest {
    #[validate(length(min = 1))]
    pub order_id: String,
}

/// Dispute submission request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDisputeRequest {
    #[validate(length(min = 1))]
    pub order_id: String,
    pub reason: String,
}

/// Dispute resolution request from the shop collaborator
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDisputeRequest {
    pub approve: bool,
}

/// Authorization decision response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResponse {
    pub can_redeem: bool,
    pub max_redeemable: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Session state response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub max_amount: Decimal,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<serde_json::Value>,
}

/// Consumption response with the appended transaction id
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub status: SessionStatus,
    pub transaction_id: Uuid,
}

/// Dispute submission response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeResponse {
    pub success: bool,
    pub auto_approved: bool,
    pub message: String,
}

/// Trust status response for the booking collaborator and customer UI
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoShowStatusResponse {
    pub tier: trust_tier::NoShowTier,
    pub no_show_count: u32,
    pub can_book: bool,
    pub requires_deposit: bool,
    pub minimum_advance_hours: u32,
    pub restrictions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_suspended_until: Option<DateTime<Utc>>,
}

/// Engine event published to NATS
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionCreated {
        session_id: Uuid,
        customer_address: String,
        shop_id: String,
        max_amount: Decimal,
        expires_at: DateTime<Utc>,
    },
    SessionApproved {
        session_id: Uuid,
        customer_address: String,
    },
    SessionRejected {
        session_id: Uuid,
        customer_address: String,
    },
    SessionConsumed {
        session_id: Uuid,
        transaction_id: Uuid,
        customer_address: String,
        shop_id: String,
        amount: Decimal,
        is_cross_shop: bool,
    },
    NoShowMarked {
        customer_address: String,
        order_id: String,
        no_show_count: u32,
        tier: trust_tier::NoShowTier,
    },
    DisputeSubmitted {
        order_id: String,
        customer_address: String,
        auto_approved: bool,
    },
    DisputeResolved {
        order_id: String,
        customer_address: String,
        approved: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn session(status: &str, expires_in: Duration) -> RedemptionSession {
        let now = Utc::now();
        RedemptionSession {
            id: Uuid::new_v4(),
            customer_address: "a1b2".to_string(),
            shop_id: "shop-001".to_string(),
            max_amount: dec!(50),
            status: status.to_string(),
            created_at: now,
            expires_at: now + expires_in,
            approved_at: None,
            used_at: None,
            signature: None,
        }
    }

    #[test]
    fn test_effective_status_expires_pending() {
        let s = session("pending", Duration::seconds(-1));
        assert_eq!(s.effective_status(Utc::now()), SessionStatus::Expired);
    }

    #[test]
    fn test_effective_status_expires_approved() {
        let s = session("approved", Duration::milliseconds(-1));
        assert_eq!(s.effective_status(Utc::now()), SessionStatus::Expired);
    }

    #[test]
    fn test_effective_status_preserves_terminal_states() {
        // A used session never flips to expired, even past the deadline
        let s = session("used", Duration::seconds(-100));
        assert_eq!(s.effective_status(Utc::now()), SessionStatus::Used);

        let s = session("rejected", Duration::seconds(-100));
        assert_eq!(s.effective_status(Utc::now()), SessionStatus::Rejected);
    }

    #[test]
    fn test_effective_status_live_session() {
        let s = session("pending", Duration::minutes(5));
        assert_eq!(s.effective_status(Utc::now()), SessionStatus::Pending);
    }

    #[test]
    fn test_signing_message_binds_session_amount_and_shop() {
        let s = session("pending", Duration::minutes(5));
        let msg = s.signing_message();
        assert_eq!(msg, format!("redeem:{}:50:shop-001", s.id));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Approved.is_terminal());
        assert!(SessionStatus::Rejected.is_terminal());
        assert!(SessionStatus::Expired.is_terminal());
        assert!(SessionStatus::Used.is_terminal());
    }
}
