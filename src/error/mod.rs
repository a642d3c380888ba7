//! Error handling for the lending service
//!
//! `LendingError` is the engine's failure taxonomy. Every variant is a local,
//! synchronous failure that leaves stored state untouched. `ApiError` maps
//! those failures (and transport-level ones) onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::loan::{LoanEvent, LoanStatus};
use crate::verification::VerificationState;

/// Failures raised by the loan lifecycle engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LendingError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("User {user_id} is not verified (verification status: {state})")]
    NotVerified {
        user_id: Uuid,
        state: VerificationState,
    },

    #[error("User {0} is blocked")]
    UserBlocked(Uuid),

    #[error("Cannot {event} a loan that is {current}")]
    IllegalTransition {
        current: LoanStatus,
        event: LoanEvent,
    },

    #[error("Cannot {action} while {current}")]
    InvalidState { current: String, action: String },

    #[error("Invalid repayment amount {amount}: outstanding balance is {outstanding}")]
    InvalidAmount {
        amount: Decimal,
        outstanding: Decimal,
    },

    #[error("Loan {0} has an open dispute; only an administrator can move it")]
    LoanDisputed(Uuid),

    #[error("User {rater_id} already rated loan {loan_id}")]
    AlreadyRated { loan_id: Uuid, rater_id: Uuid },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LendingError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        LendingError::NotFound { entity, id }
    }

    pub fn invalid_state(current: impl ToString, action: impl Into<String>) -> Self {
        LendingError::InvalidState {
            current: current.to_string(),
            action: action.into(),
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            LendingError::Validation(_) => "VALIDATION_ERROR",
            LendingError::NotVerified { .. } => "NOT_VERIFIED",
            LendingError::UserBlocked(_) => "USER_BLOCKED",
            LendingError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            LendingError::InvalidState { .. } => "INVALID_STATE",
            LendingError::InvalidAmount { .. } => "INVALID_AMOUNT",
            LendingError::LoanDisputed(_) => "LOAN_DISPUTED",
            LendingError::AlreadyRated { .. } => "ALREADY_RATED",
            LendingError::NotFound { .. } => "NOT_FOUND",
            LendingError::Forbidden(_) => "FORBIDDEN",
            LendingError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LendingError::Validation(_) => StatusCode::BAD_REQUEST,
            LendingError::NotVerified { .. }
            | LendingError::UserBlocked(_)
            | LendingError::Forbidden(_) => StatusCode::FORBIDDEN,
            LendingError::IllegalTransition { .. }
            | LendingError::InvalidState { .. }
            | LendingError::LoanDisputed(_)
            | LendingError::AlreadyRated { .. } => StatusCode::CONFLICT,
            LendingError::InvalidAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LendingError::NotFound { .. } => StatusCode::NOT_FOUND,
            LendingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for LendingError {
    fn from(err: sqlx::Error) -> Self {
        LendingError::Storage(err.to_string())
    }
}

impl From<validator::ValidationErrors> for LendingError {
    fn from(err: validator::ValidationErrors) -> Self {
        LendingError::Validation(err.to_string())
    }
}

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Lending(#[from] LendingError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Lending(err) => err.error_code(),
            ApiError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Lending(err) => err.status_code(),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %message, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lending_error_codes() {
        assert_eq!(
            LendingError::LoanDisputed(Uuid::new_v4()).error_code(),
            "LOAN_DISPUTED"
        );
        assert_eq!(
            LendingError::IllegalTransition {
                current: LoanStatus::Accepted,
                event: LoanEvent::Cancel,
            }
            .error_code(),
            "ILLEGAL_TRANSITION"
        );
        assert_eq!(
            LendingError::not_found("loan", Uuid::new_v4()).error_code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::from(LendingError::UserBlocked(Uuid::new_v4())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(LendingError::InvalidAmount {
                amount: Decimal::from(10),
                outstanding: Decimal::from(5),
            })
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(LendingError::AlreadyRated {
                loan_id: Uuid::new_v4(),
                rater_id: Uuid::new_v4(),
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::BadRequest("expected a JSON object".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_illegal_transition_message_names_state_and_event() {
        let err = LendingError::IllegalTransition {
            current: LoanStatus::Accepted,
            event: LoanEvent::Cancel,
        };
        let message = err.to_string();
        assert!(message.contains("accepted"));
        assert!(message.contains("cancel"));
    }
}
