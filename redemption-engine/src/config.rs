use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub nats: NatsConfig,
    pub auth: AuthConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub topic_prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// How long a session stays actionable after creation
    pub session_ttl_minutes: i64,

    /// Interval of the expired-session GC sweep; correctness never
    /// depends on it, expiry is applied lazily at read time
    pub sweep_interval_seconds: u64,

    /// Share of the earned balance redeemable away from the home shop
    pub cross_shop_redemption_rate: String,

    /// Days a booking suspension lasts
    pub suspension_days: i64,

    /// Successful appointments needed for tier de-escalation
    pub deescalation_threshold: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8084)?
            .set_default("server.workers", 4)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("redis.pool_size", 10)?
            .set_default("nats.topic_prefix", "rcn")?
            .set_default("engine.session_ttl_minutes", 5)?
            .set_default("engine.sweep_interval_seconds", 60)?
            .set_default("engine.cross_shop_redemption_rate", "0.20")?
            .set_default("engine.suspension_days", 30)?
            .set_default("engine.deescalation_threshold", 3)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("REDEMPTION_ENGINE")
                .separator("__")
                .list_separator(","),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(redis_url) = env::var("REDIS_URL") {
            builder = builder.set_override("redis.url", redis_url)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            builder = builder.set_override("auth.jwt_secret", secret)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.redis.url.is_empty() {
            return Err("Redis URL is required".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL is required".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("JWT secret is required".to_string());
        }

        if self.engine.session_ttl_minutes <= 0 {
            return Err("Session TTL must be positive".to_string());
        }

        use std::str::FromStr;
        match rust_decimal::Decimal::from_str(&self.engine.cross_shop_redemption_rate) {
            Ok(rate) if rate > rust_decimal::Decimal::ZERO && rate <= rust_decimal::Decimal::ONE => {}
            _ => return Err("Cross-shop redemption rate must be in (0, 1]".to_string()),
        }

        Ok(())
    }

    /// Cross-shop cap as a decimal
    pub fn cross_shop_rate(&self) -> rust_decimal::Decimal {
        use std::str::FromStr;
        rust_decimal::Decimal::from_str(&self.engine.cross_shop_redemption_rate)
            .unwrap_or_else(|_| rust_decimal::Decimal::new(20, 2))
    }

    /// Tier policy derived from engine settings
    pub fn tier_policy(&self) -> trust_tier::TierPolicy {
        trust_tier::TierPolicy {
            suspension_days: self.engine.suspension_days,
            deescalation_threshold: self.engine.deescalation_threshold,
        }
    }
}
