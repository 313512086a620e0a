use crate::errors::{RedemptionEngineError, Result};
use crate::models::{Dispute, NoShowEvent, NoShowRecord, RedemptionSession, RedemptionTransaction};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::time::Duration as StdDuration;
use trust_tier::{tier_for, NoShowTier};
use uuid::Uuid;

/// Outcome of the atomic consume transaction
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// Status flip, ledger debit, and transaction append all committed
    Consumed {
        session: RedemptionSession,
        transaction: RedemptionTransaction,
    },
    /// The guarded approved->used flip matched no row: the session was
    /// not approved, already used, or expired. Nothing was written.
    NotClaimable,
    /// The conditional debit found too little earned balance. The whole
    /// transaction rolled back; the session is still approved.
    InsufficientFunds,
}

pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(StdDuration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- Redemption sessions ---

    /// Create a pending session
    pub async fn create_session(
        &self,
        customer_address: &str,
        shop_id: &str,
        max_amount: Decimal,
        ttl_minutes: i64,
    ) -> Result<RedemptionSession> {
        let now = Utc::now();

        let session = sqlx::query_as::<_, RedemptionSession>(
            r#"
            INSERT INTO redemption_sessions
                (id, customer_address, shop_id, max_amount, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(customer_address)
        .bind(shop_id)
        .bind(max_amount)
        .bind(now)
        .bind(now + Duration::minutes(ttl_minutes))
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    /// Get a session by id
    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<RedemptionSession>> {
        let session = sqlx::query_as::<_, RedemptionSession>(
            r#"
            SELECT * FROM redemption_sessions WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// List sessions, optionally filtered by status and customer
    pub async fn list_sessions(
        &self,
        status: Option<&str>,
        customer_address: Option<&str>,
    ) -> Result<Vec<RedemptionSession>> {
        let sessions = sqlx::query_as::<_, RedemptionSession>(
            r#"
            SELECT * FROM redemption_sessions
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR customer_address = $2)
            ORDER BY created_at DESC
            LIMIT 100
            "#,
        )
        .bind(status)
        .bind(customer_address)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    /// Persist lazy expiry for one session
    ///
    /// Guarded so only a live session past its deadline flips; terminal
    /// states are never touched.
    pub async fn expire_if_due(&self, session_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE redemption_sessions
            SET status = 'expired'
            WHERE id = $1 AND status IN ('pending', 'approved') AND expires_at <= now()
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// GC sweep over all stale sessions. Correctness never depends on
    /// this; expiry is applied lazily on every read.
    pub async fn expire_stale_sessions(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE redemption_sessions
            SET status = 'expired'
            WHERE status IN ('pending', 'approved') AND expires_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Atomically transition pending -> approved, storing the signature
    ///
    /// The status and deadline guards live in the same statement as the
    /// write, so concurrent approve/reject/consume calls cannot lose an
    /// update.
    pub async fn approve_session(
        &self,
        session_id: Uuid,
        signature_hex: &str,
    ) -> Result<Option<RedemptionSession>> {
        let session = sqlx::query_as::<_, RedemptionSession>(
            r#"
            UPDATE redemption_sessions
            SET status = 'approved', approved_at = now(), signature = $2
            WHERE id = $1 AND status = 'pending' AND expires_at > now()
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(signature_hex)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Atomically transition pending -> rejected
    pub async fn reject_session(&self, session_id: Uuid) -> Result<Option<RedemptionSession>> {
        let session = sqlx::query_as::<_, RedemptionSession>(
            r#"
            UPDATE redemption_sessions
            SET status = 'rejected'
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Demote an approved session whose re-validation failed at consume
    pub async fn reject_approved_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<RedemptionSession>> {
        let session = sqlx::query_as::<_, RedemptionSession>(
            r#"
            UPDATE redemption_sessions
            SET status = 'rejected'
            WHERE id = $1 AND status = 'approved'
            RETURNING *
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Consume an approved session: one transaction covering the guarded
    /// approved -> used flip, the conditional ledger debit, and the
    /// transaction append. Either all three commit or none do.
    ///
    /// The row lock taken by the flip serializes concurrent consumes; the
    /// loser matches zero rows and gets `NotClaimable`.
    pub async fn consume_session(
        &self,
        session_id: Uuid,
        is_cross_shop: bool,
    ) -> Result<ConsumeOutcome> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, RedemptionSession>(
            r#"
            UPDATE redemption_sessions
            SET status = 'used', used_at = now()
            WHERE id = $1 AND status = 'approved' AND expires_at > now()
            RETURNING *
            "#,
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let session = match session {
            Some(session) => session,
            None => {
                tx.rollback().await?;
                return Ok(ConsumeOutcome::NotClaimable);
            }
        };

        // Conditional debit: fails when the balance dropped since approval
        let debit = sqlx::query(
            r#"
            UPDATE customers
            SET earned_balance = earned_balance - $1
            WHERE customer_address = $2 AND earned_balance >= $1
            "#,
        )
        .bind(session.max_amount)
        .bind(&session.customer_address)
        .execute(&mut *tx)
        .await?;

        if debit.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ConsumeOutcome::InsufficientFunds);
        }

        let transaction = sqlx::query_as::<_, RedemptionTransaction>(
            r#"
            INSERT INTO transactions
                (id, tx_type, customer_address, shop_id, amount, token_source,
                 is_cross_shop, status, session_id, created_at)
            VALUES ($1, 'redeem', $2, $3, $4, 'earned', $5, 'confirmed', $6, now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&session.customer_address)
        .bind(&session.shop_id)
        .bind(session.max_amount)
        .bind(is_cross_shop)
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ConsumeOutcome::Consumed {
            session,
            transaction,
        })
    }

    // --- No-show records ---

    /// Get a customer's no-show record
    pub async fn get_noshow_record(
        &self,
        customer_address: &str,
    ) -> Result<Option<NoShowRecord>> {
        let record = sqlx::query_as::<_, NoShowRecord>(
            r#"
            SELECT * FROM noshow_records WHERE customer_address = $1
            "#,
        )
        .bind(customer_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a no-show event by booking order id
    pub async fn get_noshow_event(&self, order_id: &str) -> Result<Option<NoShowEvent>> {
        let event = sqlx::query_as::<_, NoShowEvent>(
            r#"
            SELECT * FROM noshow_events WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    /// Record a no-show: append the event and bump the customer record in
    /// one transaction. The count increment is a single SQL expression so
    /// concurrent marks cannot read a stale count.
    pub async fn mark_no_show(
        &self,
        customer_address: &str,
        order_id: &str,
    ) -> Result<NoShowRecord> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO noshow_events (order_id, customer_address, marked_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(customer_address)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RedemptionEngineError::InvalidState {
                expected: "unmarked order".to_string(),
                actual: format!("no-show already recorded for order {}", order_id),
            });
        }

        // A fresh no-show cancels any de-escalation credit in progress
        let record = sqlx::query_as::<_, NoShowRecord>(
            r#"
            INSERT INTO noshow_records
                (customer_address, no_show_count, deescalated,
                 successful_since_tier3, last_no_show_at, updated_at)
            VALUES ($1, 1, FALSE, 0, $2, $2)
            ON CONFLICT (customer_address) DO UPDATE
            SET no_show_count = noshow_records.no_show_count + 1,
                deescalated = FALSE,
                successful_since_tier3 = 0,
                last_no_show_at = $2,
                updated_at = $2
            RETURNING *
            "#,
        )
        .bind(customer_address)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    /// Count a successfully completed appointment towards de-escalation
    ///
    /// Only meaningful at `DepositRequired` or above; the customer row is
    /// locked for the read-modify-write so concurrent completions and
    /// marks serialize.
    pub async fn record_completed_appointment(
        &self,
        customer_address: &str,
        deescalation_threshold: u32,
    ) -> Result<Option<NoShowRecord>> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, NoShowRecord>(
            r#"
            SELECT * FROM noshow_records WHERE customer_address = $1 FOR UPDATE
            "#,
        )
        .bind(customer_address)
        .fetch_optional(&mut *tx)
        .await?;

        let record = match record {
            Some(record) => record,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let raw_tier = tier_for(record.no_show_count.max(0) as u32);
        if raw_tier < NoShowTier::DepositRequired || record.deescalated {
            tx.rollback().await?;
            return Ok(Some(record));
        }

        let successful = record.successful_since_tier3 + 1;
        let deescalated = successful >= deescalation_threshold as i32;

        let record = sqlx::query_as::<_, NoShowRecord>(
            r#"
            UPDATE noshow_records
            SET successful_since_tier3 = $2, deescalated = $3, updated_at = now()
            WHERE customer_address = $1
            RETURNING *
            "#,
        )
        .bind(customer_address)
        .bind(successful)
        .bind(deescalated)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(record))
    }

    /// Insert a dispute and, when auto-approved, decrement the no-show
    /// count, all inside one transaction with the customer row locked.
    ///
    /// The lock makes the first-ever-dispute check race-free; the primary
    /// key on order_id enforces one dispute per no-show event.
    pub async fn submit_dispute(
        &self,
        order_id: &str,
        customer_address: &str,
        reason: &str,
    ) -> Result<(Dispute, Option<NoShowRecord>)> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            SELECT customer_address FROM noshow_records
            WHERE customer_address = $1 FOR UPDATE
            "#,
        )
        .bind(customer_address)
        .execute(&mut *tx)
        .await?;

        let prior: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM disputes WHERE customer_address = $1
            "#,
        )
        .bind(customer_address)
        .fetch_one(&mut *tx)
        .await?;

        let auto_approved = prior == 0;
        let status = if auto_approved { "auto_approved" } else { "pending" };

        let dispute = sqlx::query_as::<_, Dispute>(
            r#"
            INSERT INTO disputes
                (order_id, customer_address, reason, status, submitted_at, resolved_at)
            VALUES ($1, $2, $3, $4, now(), CASE WHEN $4 = 'auto_approved' THEN now() END)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(customer_address)
        .bind(reason)
        .bind(status)
        .fetch_optional(&mut *tx)
        .await?;

        let dispute = match dispute {
            Some(dispute) => dispute,
            None => {
                tx.rollback().await?;
                return Err(RedemptionEngineError::InvalidState {
                    expected: "no existing dispute".to_string(),
                    actual: format!("dispute already submitted for order {}", order_id),
                });
            }
        };

        let record = if auto_approved {
            Some(self.decrement_no_show_count(&mut tx, customer_address).await?)
        } else {
            None
        };

        tx.commit().await?;

        Ok((dispute, record))
    }

    /// Resolve a pending dispute; approval decrements the no-show count
    /// in the same transaction.
    pub async fn resolve_dispute(
        &self,
        order_id: &str,
        approve: bool,
    ) -> Result<(Dispute, Option<NoShowRecord>)> {
        let mut tx = self.pool.begin().await?;

        let status = if approve { "approved" } else { "rejected" };

        let dispute = sqlx::query_as::<_, Dispute>(
            r#"
            UPDATE disputes
            SET status = $2, resolved_at = now()
            WHERE order_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(status)
        .fetch_optional(&mut *tx)
        .await?;

        let dispute = match dispute {
            Some(dispute) => dispute,
            None => {
                tx.rollback().await?;
                let existing = self.get_dispute(order_id).await?;
                return Err(match existing {
                    Some(existing) => RedemptionEngineError::InvalidState {
                        expected: "pending".to_string(),
                        actual: existing.status,
                    },
                    None => RedemptionEngineError::NotFound(format!("dispute {}", order_id)),
                });
            }
        };

        let record = if approve {
            Some(
                self.decrement_no_show_count(&mut tx, &dispute.customer_address)
                    .await?,
            )
        } else {
            None
        };

        tx.commit().await?;

        Ok((dispute, record))
    }

    /// Get a dispute by order id
    pub async fn get_dispute(&self, order_id: &str) -> Result<Option<Dispute>> {
        let dispute = sqlx::query_as::<_, Dispute>(
            r#"
            SELECT * FROM disputes WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dispute)
    }

    async fn decrement_no_show_count(
        &self,
        tx: &mut sqlx::Transaction<'_, Postgres>,
        customer_address: &str,
    ) -> Result<NoShowRecord> {
        let record = sqlx::query_as::<_, NoShowRecord>(
            r#"
            UPDATE noshow_records
            SET no_show_count = GREATEST(no_show_count - 1, 0), updated_at = now()
            WHERE customer_address = $1
            RETURNING *
            "#,
        )
        .bind(customer_address)
        .fetch_one(&mut **tx)
        .await?;

        Ok(record)
    }
}
