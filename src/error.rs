//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//! Every variant carries a stable machine-readable code (see [`AppError::code`])
//! so clients can render specific messaging for each rejection.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;

use crate::models::transaction::TransactionStatus;

/// PostgreSQL SQLSTATE codes the service reacts to.
mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
}

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Not found**: voucher, product or transaction missing
/// - **Invalid state**: voucher inactive/expired/not started, product inactive,
///   illegal status transition, voucher not applicable
/// - **Quota**: global quota or per-user limit reached
/// - **Validation**: malformed input
/// - **Dependency**: payment gateway or messaging unreachable
/// - **Contention**: row locks could not be acquired within the retry budget
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (connection error, query error).
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// API key is missing, invalid, or inactive.
    #[error("Invalid API key")]
    Unauthorized,

    /// Authenticated principal lacks the admin role.
    #[error("Admin privileges required")]
    Forbidden,

    #[error("Voucher not found")]
    VoucherNotFound,

    #[error("Product not found")]
    ProductNotFound,

    #[error("Category not found")]
    CategoryNotFound,

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Voucher is not active")]
    VoucherNotActive,

    #[error("Voucher has expired")]
    VoucherExpired,

    #[error("Voucher is not valid yet")]
    VoucherNotStarted,

    /// Purchase amount is below the voucher's minimum.
    #[error("Minimum transaction amount for this voucher is {0}")]
    MinAmountNotMet(Decimal),

    /// Voucher is scoped to other categories or products.
    #[error("Voucher does not apply to this product")]
    ScopeMismatch,

    #[error("This voucher has reached its usage limit")]
    QuotaExceeded,

    #[error("You have already used this voucher the maximum number of times")]
    UserLimitExceeded,

    #[error("Product is not available for purchase")]
    ProductInactive,

    /// Requested status is not reachable from the current one.
    #[error("Cannot move from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// Operation is not allowed in the entity's current state.
    #[error("{0}")]
    InvalidState(String),

    /// Request body or parameters are invalid.
    #[error("{0}")]
    ValidationFailed(String),

    /// Payment gateway or messaging collaborator failed or timed out.
    #[error("Dependency failure: {0}")]
    DependencyFailure(String),

    /// Row lock contention persisted through every retry.
    #[error("The resource is being updated concurrently, please retry")]
    ConflictingUpdate,

    /// Lock wait timed out, deadlock or serialization failure. Retried by
    /// [`crate::db::with_retry`] and surfaced as `ConflictingUpdate`.
    #[error("Lock contention")]
    LockContention,

    /// Unique constraint violated.
    #[error("{0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|c| c.into_owned());

        match code.as_deref() {
            Some(sqlstate::UNIQUE_VIOLATION) => {
                AppError::Conflict("Resource already exists".to_string())
            }
            Some(
                sqlstate::SERIALIZATION_FAILURE
                | sqlstate::DEADLOCK_DETECTED
                | sqlstate::LOCK_NOT_AVAILABLE,
            ) => AppError::LockContention,
            _ => AppError::Database(err),
        }
    }
}

impl AppError {
    pub fn illegal_transition(from: TransactionStatus, to: TransactionStatus) -> Self {
        AppError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable reason code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "internal_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::VoucherNotFound => "voucher_not_found",
            AppError::ProductNotFound => "product_not_found",
            AppError::CategoryNotFound => "category_not_found",
            AppError::TransactionNotFound => "transaction_not_found",
            AppError::VoucherNotActive => "voucher_inactive",
            AppError::VoucherExpired => "voucher_expired",
            AppError::VoucherNotStarted => "voucher_not_started",
            AppError::MinAmountNotMet(_) => "min_amount_not_met",
            AppError::ScopeMismatch => "scope_mismatch",
            AppError::QuotaExceeded => "quota_exceeded",
            AppError::UserLimitExceeded => "user_limit_exceeded",
            AppError::ProductInactive => "product_inactive",
            AppError::IllegalTransition { .. } => "illegal_transition",
            AppError::InvalidState(_) => "invalid_state",
            AppError::ValidationFailed(_) => "validation_failed",
            AppError::DependencyFailure(_) => "dependency_failure",
            AppError::ConflictingUpdate | AppError::LockContention => "conflicting_update",
            AppError::Conflict(_) => "conflict",
        }
    }

    /// Whether this error is a voucher rejection, as opposed to an
    /// infrastructure failure. Voucher evaluation reports rejections as an
    /// invalid result instead of an error.
    pub fn is_voucher_rejection(&self) -> bool {
        matches!(
            self,
            AppError::VoucherNotFound
                | AppError::VoucherNotActive
                | AppError::VoucherExpired
                | AppError::VoucherNotStarted
                | AppError::MinAmountNotMet(_)
                | AppError::ScopeMismatch
                | AppError::QuotaExceeded
                | AppError::UserLimitExceeded
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::VoucherNotFound
            | AppError::ProductNotFound
            | AppError::CategoryNotFound
            | AppError::TransactionNotFound => StatusCode::NOT_FOUND,
            AppError::VoucherNotActive
            | AppError::VoucherExpired
            | AppError::VoucherNotStarted
            | AppError::MinAmountNotMet(_)
            | AppError::ScopeMismatch
            | AppError::QuotaExceeded
            | AppError::UserLimitExceeded
            | AppError::ProductInactive
            | AppError::IllegalTransition { .. }
            | AppError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::DependencyFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::ConflictingUpdate | AppError::LockContention | AppError::Conflict(_) => {
                StatusCode::CONFLICT
            }
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "quota_exceeded",
///     "message": "This voucher has reached its usage limit"
///   }
/// }
/// ```
///
/// Database errors are logged and hidden from the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message
            }
        }));

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes_are_stable() {
        assert_eq!(AppError::QuotaExceeded.code(), "quota_exceeded");
        assert_eq!(AppError::UserLimitExceeded.code(), "user_limit_exceeded");
        assert_eq!(AppError::ScopeMismatch.code(), "scope_mismatch");
        assert_eq!(AppError::VoucherNotFound.code(), "voucher_not_found");
        assert_eq!(
            AppError::illegal_transition(TransactionStatus::Completed, TransactionStatus::Pending)
                .code(),
            "illegal_transition"
        );
    }

    #[test]
    fn lock_contention_is_reported_as_conflicting_update() {
        assert_eq!(AppError::LockContention.code(), "conflicting_update");
        assert_eq!(AppError::LockContention.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn only_voucher_rejections_become_invalid_evaluations() {
        assert!(AppError::QuotaExceeded.is_voucher_rejection());
        assert!(AppError::MinAmountNotMet(Decimal::ONE).is_voucher_rejection());
        assert!(!AppError::ProductInactive.is_voucher_rejection());
        assert!(!AppError::ConflictingUpdate.is_voucher_rejection());
    }

    #[test]
    fn illegal_transition_message_names_both_states() {
        let err =
            AppError::illegal_transition(TransactionStatus::Failed, TransactionStatus::Processing);
        assert_eq!(err.to_string(), "Cannot move from failed to processing");
    }
}
