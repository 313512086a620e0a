//! Balance accessor over the RCN ledger
//!
//! Read path only. The single write this engine performs against the
//! ledger is the conditionally-guarded debit inside the consume
//! transaction in `database.rs`.

use crate::errors::{RedemptionEngineError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use trust_tier::EarningTier;

/// Customer balances as read from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerBalances {
    pub customer_address: String,

    /// Tokens awarded for repairs; the only redeemable balance
    pub earned_balance: Decimal,

    /// Tokens acquired outside the earn flow; never redeemable
    pub market_balance: Decimal,

    /// Monotonic lifetime earnings, drives the earning tier
    pub lifetime_earnings: Decimal,

    /// Shop of the customer's first earning transaction, if any
    pub home_shop_id: Option<String>,

    /// Earning tier, recomputed from lifetime earnings on every read
    pub tier: EarningTier,
}

impl CustomerBalances {
    /// Whether `shop_id` is the customer's home shop
    pub fn is_home_shop(&self, shop_id: &str) -> bool {
        self.home_shop_id.as_deref() == Some(shop_id)
    }
}

/// Read-only ledger seam
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetch a customer's balances; `NotFound` when no ledger record exists
    async fn get_balances(&self, customer_address: &str) -> Result<CustomerBalances>;
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    customer_address: String,
    earned_balance: Decimal,
    market_balance: Decimal,
    lifetime_earnings: Decimal,
    home_shop_id: Option<String>,
}

/// Ledger accessor backed by the `customers` table
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        PgLedger { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn get_balances(&self, customer_address: &str) -> Result<CustomerBalances> {
        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT customer_address, earned_balance, market_balance,
                   lifetime_earnings, home_shop_id
            FROM customers
            WHERE customer_address = $1
            "#,
        )
        .bind(customer_address)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RedemptionEngineError::NotFound(format!("customer {}", customer_address))
        })?;

        Ok(CustomerBalances {
            tier: EarningTier::from_lifetime_earnings(row.lifetime_earnings),
            customer_address: row.customer_address,
            earned_balance: row.earned_balance,
            market_balance: row.market_balance,
            lifetime_earnings: row.lifetime_earnings,
            home_shop_id: row.home_shop_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_home_shop_match() {
        let balances = CustomerBalances {
            customer_address: "a1".to_string(),
            earned_balance: dec!(100),
            market_balance: dec!(0),
            lifetime_earnings: dec!(250),
            home_shop_id: Some("shop-001".to_string()),
            tier: EarningTier::Silver,
        };

        assert!(balances.is_home_shop("shop-001"));
        assert!(!balances.is_home_shop("shop-002"));
    }

    #[test]
    fn test_no_home_shop_is_never_home() {
        let balances = CustomerBalances {
            customer_address: "a1".to_string(),
            earned_balance: dec!(0),
            market_balance: dec!(10),
            lifetime_earnings: dec!(0),
            home_shop_id: None,
            tier: EarningTier::Bronze,
        };

        assert!(!balances.is_home_shop("shop-001"));
    }
}
