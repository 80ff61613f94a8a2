use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletError>;

/// Coarse classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Unauthorized,
    Forbidden,
    Transient,
    Internal,
}

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Client not found: {0}")]
    ClientNotFound(i64),

    #[error("Client record not found for user {0}")]
    ClientRecordNotFound(i64),

    #[error("Partner profile not found for user {0}")]
    PartnerNotFound(i64),

    #[error("Row lock timeout on client {0}")]
    LockTimeout(i64),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Access denied. Required role: {0}")]
    Forbidden(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::Database(err) => classify_sqlx(err),
            WalletError::Storage(_) => ErrorKind::Internal,
            WalletError::Validation(_) => ErrorKind::InvalidInput,
            WalletError::ClientNotFound(_) => ErrorKind::NotFound,
            WalletError::ClientRecordNotFound(_) => ErrorKind::NotFound,
            WalletError::PartnerNotFound(_) => ErrorKind::NotFound,
            WalletError::LockTimeout(_) => ErrorKind::Transient,
            WalletError::Unauthorized(_) => ErrorKind::Unauthorized,
            WalletError::Forbidden(_) => ErrorKind::Forbidden,
            WalletError::Serialization(_) => ErrorKind::Internal,
            WalletError::Config(_) => ErrorKind::Internal,
            WalletError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    fn error_type(&self) -> &str {
        match self.kind() {
            ErrorKind::InvalidInput => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Transient => "transient_error",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Message safe to hand to untrusted callers. Driver text stays in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Transient => "Ledger is busy. Please retry shortly.".to_string(),
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Lock waits, deadlocks, serialization conflicts and pool exhaustion are
/// retryable by the caller; everything else from the driver is internal.
fn classify_sqlx(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ErrorKind::Transient
        }
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // deadlock_detected, serialization_failure, lock_not_available, query_canceled
            Some("40P01") | Some("40001") | Some("55P03") | Some("57014") => ErrorKind::Transient,
            _ => ErrorKind::Internal,
        },
        _ => ErrorKind::Internal,
    }
}

impl ResponseError for WalletError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        if matches!(self.kind(), ErrorKind::Transient | ErrorKind::Internal) {
            tracing::error!(error = %self, kind = ?self.kind(), "request failed");
        }

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.public_message(),
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
