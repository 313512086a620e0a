use crate::database::{ConsumeOutcome, Database};
use crate::errors::{RedemptionEngineError, Result};
use crate::ledger::{CustomerBalances, Ledger};
use crate::metrics;
use crate::models::{
    AuthorizationResponse, ConsumeResponse, DisputeResponse, EngineEvent, MarkNoShowRequest,
    NoShowRecord, NoShowStatusResponse, RedemptionSession, SessionResponse, SessionStatus,
    SubmitDisputeRequest, VerifyRedemptionRequest,
};
use crate::nats::NatsProducer;
use crate::signature::verify_signature;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use trust_tier::{derive_status, NoShowTier, TierPolicy, TierStatus};
use uuid::Uuid;

/// Evaluate a redemption authorization against current balances and the
/// customer's trust status.
///
/// Pure decision function: the actual debit is deferred to session
/// consumption, where the balance is re-checked under a conditional
/// update. The cross-shop cap and the trust-tier multiplier stack
/// multiplicatively.
pub fn evaluate_authorization(
    balances: &CustomerBalances,
    status: &TierStatus,
    shop_id: &str,
    amount: Decimal,
    cross_shop_rate: Decimal,
    now: DateTime<Utc>,
) -> AuthorizationResponse {
    if balances.earned_balance <= Decimal::ZERO {
        return AuthorizationResponse {
            can_redeem: false,
            max_redeemable: Decimal::ZERO,
            reason: Some("no earned balance".to_string()),
        };
    }

    if status.tier == NoShowTier::Suspended {
        if let Some(until) = status.booking_suspended_until {
            if now < until {
                return AuthorizationResponse {
                    can_redeem: false,
                    max_redeemable: Decimal::ZERO,
                    reason: Some(format!("booking suspended until {}", until.to_rfc3339())),
                };
            }
        }
    }

    let base_cap = if balances.is_home_shop(shop_id) {
        balances.earned_balance
    } else {
        (balances.earned_balance * cross_shop_rate).floor()
    };

    let max_redeemable = (base_cap * status.restrictions.redemption_multiplier).floor();

    if amount > max_redeemable {
        return AuthorizationResponse {
            can_redeem: false,
            max_redeemable,
            reason: Some(format!(
                "amount {} exceeds redeemable limit of {}",
                amount, max_redeemable
            )),
        };
    }

    AuthorizationResponse {
        can_redeem: true,
        max_redeemable,
        reason: None,
    }
}

/// Derive trust status from an optional stored record
fn status_from_record(
    record: Option<&NoShowRecord>,
    policy: &TierPolicy,
    now: DateTime<Utc>,
) -> TierStatus {
    match record {
        Some(record) => derive_status(
            record.no_show_count.max(0) as u32,
            record.deescalated,
            record.last_no_show_at,
            policy,
            now,
        ),
        None => derive_status(0, false, None, policy, now),
    }
}

/// Authorization against the ledger seam with a pre-loaded trust record
pub async fn authorize_with(
    ledger: &dyn Ledger,
    record: Option<&NoShowRecord>,
    policy: &TierPolicy,
    cross_shop_rate: Decimal,
    customer_address: &str,
    shop_id: &str,
    amount: Decimal,
) -> Result<AuthorizationResponse> {
    let balances = ledger.get_balances(customer_address).await?;
    let now = Utc::now();
    let status = status_from_record(record, policy, now);
    Ok(evaluate_authorization(
        &balances,
        &status,
        shop_id,
        amount,
        cross_shop_rate,
        now,
    ))
}

pub struct RedemptionService {
    db: Arc<Database>,
    ledger: Arc<dyn Ledger>,
    nats: Arc<NatsProducer>,
    redis: ConnectionManager,
    policy: TierPolicy,
    cross_shop_rate: Decimal,
    session_ttl_minutes: i64,
}

impl RedemptionService {
    pub fn new(
        db: Arc<Database>,
        ledger: Arc<dyn Ledger>,
        nats: Arc<NatsProducer>,
        redis: ConnectionManager,
        policy: TierPolicy,
        cross_shop_rate: Decimal,
        session_ttl_minutes: i64,
    ) -> Self {
        RedemptionService {
            db,
            ledger,
            nats,
            redis,
            policy,
            cross_shop_rate,
            session_ttl_minutes,
        }
    }

    /// Authorization check (§ verify endpoint); no side effects
    pub async fn authorize(
        &self,
        customer_address: &str,
        shop_id: &str,
        amount: Decimal,
    ) -> Result<AuthorizationResponse> {
        let record = self.db.get_noshow_record(customer_address).await?;
        let decision = authorize_with(
            self.ledger.as_ref(),
            record.as_ref(),
            &self.policy,
            self.cross_shop_rate,
            customer_address,
            shop_id,
            amount,
        )
        .await?;

        if !decision.can_redeem {
            metrics::REDEMPTIONS_DENIED.inc();
        }

        Ok(decision)
    }

    /// Create a pending session for display as a QR payload
    pub async fn create_session(
        &self,
        request: VerifyRedemptionRequest,
    ) -> Result<SessionResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| RedemptionEngineError::Validation(e.to_string()))?;

        if request.amount <= Decimal::ZERO {
            return Err(RedemptionEngineError::Validation(
                "amount must be positive".to_string(),
            ));
        }

        let decision = self
            .authorize(&request.customer_address, &request.shop_id, request.amount)
            .await?;
        if !decision.can_redeem {
            return Err(RedemptionEngineError::Unauthorized(
                decision.reason.unwrap_or_else(|| "redemption denied".to_string()),
            ));
        }

        let session = self
            .db
            .create_session(
                &request.customer_address,
                &request.shop_id,
                request.amount,
                self.session_ttl_minutes,
            )
            .await?;

        self.publish(EngineEvent::SessionCreated {
            session_id: session.id,
            customer_address: session.customer_address.clone(),
            shop_id: session.shop_id.clone(),
            max_amount: session.max_amount,
            expires_at: session.expires_at,
        })
        .await;

        metrics::SESSIONS_CREATED.inc();

        info!(
            "Created session {} for {} at shop {} (max {})",
            session.id, session.customer_address, session.shop_id, session.max_amount
        );

        Ok(SessionResponse {
            session_id: session.id,
            status: SessionStatus::Pending,
            max_amount: session.max_amount,
            expires_at: session.expires_at,
            qr_payload: Some(session.qr_payload()),
        })
    }

    /// Customer approval: signature check plus guarded pending -> approved
    pub async fn approve_session(
        &self,
        session_id: Uuid,
        signature_hex: &str,
    ) -> Result<SessionResponse> {
        let (session, effective) = self.load_session(session_id).await?;

        if effective != SessionStatus::Pending {
            return Err(RedemptionEngineError::InvalidState {
                expected: "pending".to_string(),
                actual: effective.as_str().to_string(),
            });
        }

        let message = session.signing_message();
        if !verify_signature(message.as_bytes(), signature_hex, &session.customer_address) {
            return Err(RedemptionEngineError::Unauthorized(
                "signature does not match customer wallet".to_string(),
            ));
        }

        // Guarded update: the pending check and deadline re-run inside the
        // statement, so a concurrent reject or expiry cannot be overwritten
        let session = match self.db.approve_session(session_id, signature_hex).await? {
            Some(session) => session,
            None => return self.invalid_state_for(session_id, "pending").await,
        };

        self.publish(EngineEvent::SessionApproved {
            session_id,
            customer_address: session.customer_address.clone(),
        })
        .await;

        metrics::SESSIONS_APPROVED.inc();

        Ok(SessionResponse {
            session_id,
            status: SessionStatus::Approved,
            max_amount: session.max_amount,
            expires_at: session.expires_at,
            qr_payload: None,
        })
    }

    /// Customer rejection of a pending session
    pub async fn reject_session(&self, session_id: Uuid) -> Result<SessionResponse> {
        let (_, effective) = self.load_session(session_id).await?;

        if effective != SessionStatus::Pending {
            return Err(RedemptionEngineError::InvalidState {
                expected: "pending".to_string(),
                actual: effective.as_str().to_string(),
            });
        }

        let session = match self.db.reject_session(session_id).await? {
            Some(session) => session,
            None => return self.invalid_state_for(session_id, "pending").await,
        };

        self.publish(EngineEvent::SessionRejected {
            session_id,
            customer_address: session.customer_address.clone(),
        })
        .await;

        Ok(SessionResponse {
            session_id,
            status: SessionStatus::Rejected,
            max_amount: session.max_amount,
            expires_at: session.expires_at,
            qr_payload: None,
        })
    }

    /// Shop consumption: re-validate with current balances, then the
    /// atomic flip + debit + transaction append.
    pub async fn consume_session(
        &self,
        session_id: Uuid,
        shop_id: &str,
    ) -> Result<ConsumeResponse> {
        let (session, effective) = self.load_session(session_id).await?;

        if session.shop_id != shop_id {
            return Err(RedemptionEngineError::Unauthorized(
                "session belongs to a different shop".to_string(),
            ));
        }

        if effective != SessionStatus::Approved {
            return Err(RedemptionEngineError::InvalidState {
                expected: "approved".to_string(),
                actual: effective.as_str().to_string(),
            });
        }

        // Balances may have moved since approval; re-check before debiting
        let balances = self.ledger.get_balances(&session.customer_address).await?;
        let record = self.db.get_noshow_record(&session.customer_address).await?;
        let now = Utc::now();
        let status = status_from_record(record.as_ref(), &self.policy, now);
        let decision = evaluate_authorization(
            &balances,
            &status,
            &session.shop_id,
            session.max_amount,
            self.cross_shop_rate,
            now,
        );

        if !decision.can_redeem {
            warn!(
                "Re-validation failed for session {}: {:?}",
                session_id, decision.reason
            );
            self.db.reject_approved_session(session_id).await?;
            metrics::REDEMPTIONS_DENIED.inc();

            if balances.earned_balance < session.max_amount {
                return Err(RedemptionEngineError::InsufficientFunds {
                    required: session.max_amount.to_string(),
                    available: balances.earned_balance.to_string(),
                });
            }
            return Err(RedemptionEngineError::Unauthorized(
                decision.reason.unwrap_or_else(|| "redemption denied".to_string()),
            ));
        }

        let is_cross_shop = !balances.is_home_shop(&session.shop_id);

        match self.db.consume_session(session_id, is_cross_shop).await? {
            ConsumeOutcome::Consumed {
                session,
                transaction,
            } => {
                self.publish(EngineEvent::SessionConsumed {
                    session_id,
                    transaction_id: transaction.id,
                    customer_address: session.customer_address.clone(),
                    shop_id: session.shop_id.clone(),
                    amount: session.max_amount,
                    is_cross_shop,
                })
                .await;

                metrics::SESSIONS_CONSUMED.inc();
                metrics::REDEEMED_AMOUNT
                    .observe(session.max_amount.to_f64().unwrap_or(0.0));

                info!(
                    "Consumed session {}: debited {} from {} (transaction {})",
                    session_id, session.max_amount, session.customer_address, transaction.id
                );

                Ok(ConsumeResponse {
                    status: SessionStatus::Used,
                    transaction_id: transaction.id,
                })
            }
            // Lost the race against a concurrent consume, reject, or expiry
            ConsumeOutcome::NotClaimable => self.invalid_state_for(session_id, "approved").await,
            ConsumeOutcome::InsufficientFunds => {
                self.db.reject_approved_session(session_id).await?;
                Err(RedemptionEngineError::InsufficientFunds {
                    required: session.max_amount.to_string(),
                    available: balances.earned_balance.to_string(),
                })
            }
        }
    }

    /// List sessions for the approval UI, with lazy expiry applied
    pub async fn list_sessions(
        &self,
        status: Option<&str>,
        customer_address: Option<&str>,
    ) -> Result<Vec<SessionResponse>> {
        let now = Utc::now();
        let sessions = self.db.list_sessions(status, customer_address).await?;

        Ok(sessions
            .into_iter()
            .map(|session| SessionResponse {
                session_id: session.id,
                status: session.effective_status(now),
                max_amount: session.max_amount,
                expires_at: session.expires_at,
                qr_payload: None,
            })
            .filter(|response| match status {
                // A stored-pending session that lapsed must not show as pending
                Some(filter) => response.status.as_str() == filter,
                None => true,
            })
            .collect())
    }

    /// GC sweep; correctness never depends on when this runs
    pub async fn expire_stale_sessions(&self) -> Result<u64> {
        let expired = self.db.expire_stale_sessions().await?;
        if expired > 0 {
            metrics::SESSIONS_EXPIRED.inc_by(expired);
            info!("Expired {} stale sessions", expired);
        }
        Ok(expired)
    }

    // --- No-show trust tier ---

    /// Derived trust status for a customer (cached)
    pub async fn no_show_status(&self, customer_address: &str) -> Result<NoShowStatusResponse> {
        let cache_key = format!("noshow:{}", customer_address);
        if let Ok(cached) = self
            .redis
            .clone()
            .get::<String, String>(cache_key.clone())
            .await
        {
            if let Ok(response) = serde_json::from_str::<NoShowStatusResponse>(&cached) {
                return Ok(response);
            }
        }

        let record = self.db.get_noshow_record(customer_address).await?;
        let now = Utc::now();
        let status = status_from_record(record.as_ref(), &self.policy, now);

        let response = NoShowStatusResponse {
            tier: status.tier,
            no_show_count: status.no_show_count,
            can_book: status.restrictions.can_book,
            requires_deposit: status.restrictions.requires_deposit,
            minimum_advance_hours: status.restrictions.minimum_advance_hours,
            restrictions: status.restrictions.restrictions.clone(),
            booking_suspended_until: status.booking_suspended_until,
        };

        let cached = serde_json::to_string(&response)?;
        let _: () = self
            .redis
            .clone()
            .set_ex(cache_key, cached, 60)
            .await
            .map_err(RedemptionEngineError::Redis)?;

        Ok(response)
    }

    /// Record a no-show (booking collaborator callback)
    pub async fn mark_no_show(
        &self,
        customer_address: &str,
        request: MarkNoShowRequest,
    ) -> Result<NoShowStatusResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| RedemptionEngineError::Validation(e.to_string()))?;

        let record = self
            .db
            .mark_no_show(customer_address, &request.order_id)
            .await?;

        self.invalidate_status_cache(customer_address).await;

        let now = Utc::now();
        let status = status_from_record(Some(&record), &self.policy, now);

        self.publish(EngineEvent::NoShowMarked {
            customer_address: customer_address.to_string(),
            order_id: request.order_id.clone(),
            no_show_count: status.no_show_count,
            tier: status.tier,
        })
        .await;

        metrics::NO_SHOWS_MARKED.inc();

        info!(
            "Marked no-show for {} (order {}, count now {}, tier {:?})",
            customer_address, request.order_id, status.no_show_count, status.tier
        );

        Ok(NoShowStatusResponse {
            tier: status.tier,
            no_show_count: status.no_show_count,
            can_book: status.restrictions.can_book,
            requires_deposit: status.restrictions.requires_deposit,
            minimum_advance_hours: status.restrictions.minimum_advance_hours,
            restrictions: status.restrictions.restrictions.clone(),
            booking_suspended_until: status.booking_suspended_until,
        })
    }

    /// Count a completed appointment towards de-escalation
    pub async fn record_completed_appointment(&self, customer_address: &str) -> Result<()> {
        let record = self
            .db
            .record_completed_appointment(customer_address, self.policy.deescalation_threshold)
            .await?;

        if let Some(record) = record {
            if record.deescalated {
                info!(
                    "Customer {} earned tier de-escalation after {} completed appointments",
                    customer_address, record.successful_since_tier3
                );
            }
        }

        self.invalidate_status_cache(customer_address).await;

        Ok(())
    }

    /// Submit a dispute against a no-show event
    pub async fn submit_dispute(&self, request: SubmitDisputeRequest) -> Result<DisputeResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| RedemptionEngineError::Validation(e.to_string()))?;

        let event = self
            .db
            .get_noshow_event(&request.order_id)
            .await?
            .ok_or_else(|| {
                RedemptionEngineError::NotFound(format!("no-show event {}", request.order_id))
            })?;

        let now = Utc::now();
        trust_tier::dispute::check_dispute_window(event.marked_at, now)?;
        trust_tier::validate_reason(&request.reason)?;

        let (dispute, _) = self
            .db
            .submit_dispute(&request.order_id, &event.customer_address, &request.reason)
            .await?;

        let auto_approved = dispute.status == "auto_approved";
        if auto_approved {
            self.invalidate_status_cache(&event.customer_address).await;
            metrics::DISPUTES_AUTO_APPROVED.inc();
        }

        self.publish(EngineEvent::DisputeSubmitted {
            order_id: request.order_id.clone(),
            customer_address: event.customer_address.clone(),
            auto_approved,
        })
        .await;

        Ok(DisputeResponse {
            success: true,
            auto_approved,
            message: if auto_approved {
                "First dispute auto-approved; no-show record corrected".to_string()
            } else {
                "Dispute submitted for shop review".to_string()
            },
        })
    }

    /// Shop resolution of a pending dispute
    pub async fn resolve_dispute(&self, order_id: &str, approve: bool) -> Result<DisputeResponse> {
        let (dispute, _) = self.db.resolve_dispute(order_id, approve).await?;

        if approve {
            self.invalidate_status_cache(&dispute.customer_address).await;
        }

        self.publish(EngineEvent::DisputeResolved {
            order_id: order_id.to_string(),
            customer_address: dispute.customer_address.clone(),
            approved: approve,
        })
        .await;

        Ok(DisputeResponse {
            success: true,
            auto_approved: false,
            message: if approve {
                "Dispute approved; no-show record corrected".to_string()
            } else {
                "Dispute rejected".to_string()
            },
        })
    }

    // --- Helpers ---

    /// Load a session, persisting lazy expiry when its deadline passed
    async fn load_session(
        &self,
        session_id: Uuid,
    ) -> Result<(RedemptionSession, SessionStatus)> {
        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or_else(|| RedemptionEngineError::NotFound(format!("session {}", session_id)))?;

        let effective = session.effective_status(Utc::now());
        if effective == SessionStatus::Expired && session.status != "expired" {
            self.db.expire_if_due(session_id).await?;
        }

        Ok((session, effective))
    }

    /// Report the current state after a guarded update matched no rows
    async fn invalid_state_for<T>(&self, session_id: Uuid, expected: &str) -> Result<T> {
        let (_, effective) = self.load_session(session_id).await?;
        Err(RedemptionEngineError::InvalidState {
            expected: expected.to_string(),
            actual: effective.as_str().to_string(),
        })
    }

    async fn invalidate_status_cache(&self, customer_address: &str) {
        let cache_key = format!("noshow:{}", customer_address);
        let result: redis::RedisResult<()> = self.redis.clone().del(cache_key).await;
        if let Err(e) = result {
            error!("Failed to invalidate status cache: {}", e);
        }
    }

    async fn publish(&self, event: EngineEvent) {
        if let Err(e) = self.nats.publish_event(&event).await {
            error!("Failed to publish event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;
    use rust_decimal_macros::dec;
    use trust_tier::EarningTier;

    fn balances(earned: Decimal, home_shop: Option<&str>) -> CustomerBalances {
        CustomerBalances {
            customer_address: "c1".to_string(),
            earned_balance: earned,
            market_balance: dec!(40),
            lifetime_earnings: dec!(500),
            home_shop_id: home_shop.map(str::to_string),
            tier: EarningTier::Silver,
        }
    }

    fn status(no_show_count: u32) -> TierStatus {
        derive_status(no_show_count, false, Some(Utc::now()), &TierPolicy::default(), Utc::now())
    }

    #[test]
    fn test_home_shop_full_balance_redeemable() {
        let decision = evaluate_authorization(
            &balances(dec!(100), Some("shop-1")),
            &status(0),
            "shop-1",
            dec!(100),
            dec!(0.20),
            Utc::now(),
        );
        assert!(decision.can_redeem);
        assert_eq!(decision.max_redeemable, dec!(100));
    }

    #[test]
    fn test_cross_shop_capped_at_twenty_percent() {
        let decision = evaluate_authorization(
            &balances(dec!(300), Some("shop-1")),
            &status(0),
            "shop-2",
            dec!(60),
            dec!(0.20),
            Utc::now(),
        );
        assert!(decision.can_redeem);
        assert_eq!(decision.max_redeemable, dec!(60));

        // One token over the cap is denied
        let decision = evaluate_authorization(
            &balances(dec!(300), Some("shop-1")),
            &status(0),
            "shop-2",
            dec!(61),
            dec!(0.20),
            Utc::now(),
        );
        assert!(!decision.can_redeem);
    }

    #[test]
    fn test_caution_multiplier_stacks_on_home_cap() {
        // noShowCount=2 (caution), earned=100, home shop:
        // floor(100 * 1.0 * 0.8) = 80
        let decision = evaluate_authorization(
            &balances(dec!(100), Some("shop-1")),
            &status(2),
            "shop-1",
            dec!(80),
            dec!(0.20),
            Utc::now(),
        );
        assert!(decision.can_redeem);
        assert_eq!(decision.max_redeemable, dec!(80));

        let decision = evaluate_authorization(
            &balances(dec!(100), Some("shop-1")),
            &status(2),
            "shop-1",
            dec!(81),
            dec!(0.20),
            Utc::now(),
        );
        assert!(!decision.can_redeem);
    }

    #[test]
    fn test_caution_multiplier_stacks_multiplicatively_cross_shop() {
        // floor(floor(100 * 0.2) * 0.8) = 16
        let decision = evaluate_authorization(
            &balances(dec!(100), Some("shop-1")),
            &status(2),
            "shop-2",
            dec!(16),
            dec!(0.20),
            Utc::now(),
        );
        assert!(decision.can_redeem);
        assert_eq!(decision.max_redeemable, dec!(16));
    }

    #[test]
    fn test_zero_earned_balance_denied() {
        let decision = evaluate_authorization(
            &balances(dec!(0), Some("shop-1")),
            &status(0),
            "shop-1",
            dec!(1),
            dec!(0.20),
            Utc::now(),
        );
        assert!(!decision.can_redeem);
        assert_eq!(decision.reason.as_deref(), Some("no earned balance"));
        // Market balance never counts towards redemption
        assert_eq!(decision.max_redeemable, dec!(0));
    }

    #[test]
    fn test_active_suspension_denies_outright() {
        let decision = evaluate_authorization(
            &balances(dec!(1000), Some("shop-1")),
            &status(5),
            "shop-1",
            dec!(1),
            dec!(0.20),
            Utc::now(),
        );
        assert!(!decision.can_redeem);
        assert!(decision.reason.unwrap().starts_with("booking suspended"));
    }

    #[tokio::test]
    async fn test_authorize_with_unknown_customer() {
        let mut ledger = MockLedger::new();
        ledger.expect_get_balances().returning(|address| {
            Err(RedemptionEngineError::NotFound(format!(
                "customer {}",
                address
            )))
        });

        let result = authorize_with(
            &ledger,
            None,
            &TierPolicy::default(),
            dec!(0.20),
            "unknown",
            "shop-1",
            dec!(10),
        )
        .await;

        assert!(matches!(result, Err(RedemptionEngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_authorize_with_clean_record_defaults_to_normal() {
        let mut ledger = MockLedger::new();
        ledger
            .expect_get_balances()
            .returning(|_| Ok(balances(dec!(50), Some("shop-1"))));

        let decision = authorize_with(
            &ledger,
            None,
            &TierPolicy::default(),
            dec!(0.20),
            "c1",
            "shop-1",
            dec!(50),
        )
        .await
        .unwrap();

        assert!(decision.can_redeem);
        assert_eq!(decision.max_redeemable, dec!(50));
    }
}
