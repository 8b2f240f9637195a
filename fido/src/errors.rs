use crate::api::models::response::ApiResponse;
use crate::db::errors::DbError;
use crate::money::MoneyError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The request conflicts with the current state of the resource
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// A debit or reversal would take the balance below zero
    #[error("Insufficient balance: {balance} cents available, {requested} cents required")]
    InsufficientBalance { balance: i64, requested: i64 },

    /// A backing service (database, redis) is not reachable
    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InsufficientBalance { .. } => StatusCode::CONFLICT,
            Error::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::InvalidValue { .. } | DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable error kind, carried in the `error` field of the envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest { .. } => "bad_request",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::ServiceUnavailable { .. } => "service_unavailable",
            Error::Database(DbError::NotFound) => "not_found",
            Error::Database(DbError::UniqueViolation { .. }) => "conflict",
            Error::Database(DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. }) => "bad_request",
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => "internal_error",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Conflict { message } => message.clone(),
            Error::InsufficientBalance { .. } => "Insufficient balance for this operation".to_string(),
            Error::ServiceUnavailable { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "A user with this email address already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::InvalidValue { .. } | DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_) | DbError::InvalidValue { .. }) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::ServiceUnavailable { .. } => {
                tracing::warn!("Dependency unavailable: {}", self);
            }
            Error::Conflict { .. } | Error::InsufficientBalance { .. } => {
                tracing::info!("Conflict error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ApiResponse::error(self.user_message(), self.kind());
        (status, Json(body)).into_response()
    }
}

impl From<MoneyError> for Error {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::InsufficientFunds { balance, requested } => Error::InsufficientBalance { balance, requested },
            other => Error::BadRequest { message: other.to_string() },
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            Error::BadRequest { message: "x".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::InsufficientBalance { balance: 1, requested: 2 }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(Error::Database(DbError::NotFound).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::ServiceUnavailable { message: "redis".into() }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Other(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn insufficient_funds_maps_to_conflict() {
        let err: Error = MoneyError::InsufficientFunds {
            balance: 100,
            requested: 500,
        }
        .into();
        assert!(matches!(err, Error::InsufficientBalance { balance: 100, requested: 500 }));

        let err: Error = MoneyError::BelowMinimum.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_message(), "amount must be at least 0.01");
    }

    #[test]
    fn duplicate_email_gets_friendly_message() {
        let err = Error::Database(DbError::UniqueViolation {
            constraint: Some("users_email_unique".into()),
            table: Some("users".into()),
            message: "duplicate key".into(),
        });
        assert_eq!(err.user_message(), "A user with this email address already exists");
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let response = Error::Other(anyhow::anyhow!("password=hunter2")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Internal server error");
        assert_eq!(json["error"], "internal_error");
        assert!(json["data"].is_null());
        assert!(!String::from_utf8_lossy(&body).contains("hunter2"));
    }
}
