use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Error taxonomy shared by the engine, the store and the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Oversell, illegal state transition, expired order, lock contention.
    /// `retryable` is set when the caller may simply try again.
    #[error("conflict: {message}")]
    Conflict { message: String, retryable: bool },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("payment gateway error: {0}")]
    PaymentGateway(String),

    #[error("database error")]
    Database(#[source] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict { message: msg.into(), retryable: false }
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        AppError::Conflict { message: msg.into(), retryable: true }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict { retryable: true, .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::PaymentGateway(_) => "PAYMENT_GATEWAY_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Forbidden(msg)
            | AppError::PaymentGateway(msg) => msg.clone(),
            AppError::Conflict { message, .. } => message.clone(),
            AppError::Unauthorized => "authentication required".to_string(),
            AppError::Database(_) | AppError::Internal(_) => "internal server error".to_string(),
        }
    }

    fn log(&self) {
        match self {
            AppError::Database(e) => error!(error = ?e, "database error"),
            AppError::Internal(msg) => error!(message = %msg, "internal error"),
            AppError::PaymentGateway(msg) => warn!(message = %msg, "payment gateway error"),
            other => debug!(error = %other, "request rejected"),
        }
    }
}

// Postgres SQLSTATE codes that mean "someone else holds the row, try again".
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const QUERY_CANCELED: &str = "57014";
const CHECK_VIOLATION: &str = "23514";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) | Some(QUERY_CANCELED) => {
                    return AppError::retryable("inventory is busy, please retry");
                }
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    return AppError::retryable("concurrent update detected, please retry");
                }
                Some(CHECK_VIOLATION) => {
                    return AppError::conflict("not enough tickets available");
                }
                // order number or QR token collision
                Some(UNIQUE_VIOLATION) => {
                    return AppError::retryable("duplicate identifier generated, please retry");
                }
                _ => {}
            }
        }
        if let sqlx::Error::PoolTimedOut = e {
            return AppError::retryable("database is busy, please retry");
        }
        AppError::Database(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "code": self.code(),
            "message": self.public_message(),
        }));

        if self.is_retryable() {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
