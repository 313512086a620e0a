use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedemptionEngineError>;

#[derive(Error, Debug)]
pub enum RedemptionEngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Dispute window expired: {0}")]
    WindowExpired(String),

    #[error("Invalid dispute reason: {0}")]
    InvalidReason(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<trust_tier::Error> for RedemptionEngineError {
    fn from(err: trust_tier::Error) -> Self {
        match err {
            trust_tier::Error::WindowExpired(msg) => RedemptionEngineError::WindowExpired(msg),
            trust_tier::Error::InvalidReason(msg) => RedemptionEngineError::InvalidReason(msg),
            trust_tier::Error::InvalidConfig(msg) => RedemptionEngineError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for RedemptionEngineError {
    fn from(err: serde_json::Error) -> Self {
        RedemptionEngineError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl ResponseError for RedemptionEngineError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RedemptionEngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RedemptionEngineError::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RedemptionEngineError::Nats(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RedemptionEngineError::Validation(_) => StatusCode::BAD_REQUEST,
            RedemptionEngineError::NotFound(_) => StatusCode::NOT_FOUND,
            RedemptionEngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RedemptionEngineError::InvalidState { .. } => StatusCode::CONFLICT,
            RedemptionEngineError::WindowExpired(_) => StatusCode::GONE,
            RedemptionEngineError::InvalidReason(_) => StatusCode::BAD_REQUEST,
            RedemptionEngineError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            RedemptionEngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl RedemptionEngineError {
    fn error_type(&self) -> &str {
        match self {
            RedemptionEngineError::Database(_) => "database_error",
            RedemptionEngineError::Redis(_) => "cache_error",
            RedemptionEngineError::Nats(_) => "messaging_error",
            RedemptionEngineError::Validation(_) => "validation_error",
            RedemptionEngineError::NotFound(_) => "not_found",
            RedemptionEngineError::Unauthorized(_) => "unauthorized",
            RedemptionEngineError::InvalidState { .. } => "invalid_state",
            RedemptionEngineError::WindowExpired(_) => "window_expired",
            RedemptionEngineError::InvalidReason(_) => "invalid_reason",
            RedemptionEngineError::InsufficientFunds { .. } => "insufficient_funds",
            RedemptionEngineError::Internal(_) => "internal_error",
        }
    }
}
