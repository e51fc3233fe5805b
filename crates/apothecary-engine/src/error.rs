//! # Engine Error Types
//!
//! Error taxonomy for transaction operations, with the HTTP status each
//! error maps to.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Client (4xx)   │  │  Server (5xx)   │  │  NOT errors (data)      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation 400 │  │  Database  500  │  │  InvoiceOutcome::Skipped│ │
//! │  │  Unauth.    401 │  │  Storage   500  │  │  InvoiceOutcome::Failed │ │
//! │  │  Discount   403 │  │  Email     500  │  │  InventoryReport.errors │ │
//! │  │  NotFound   404 │  │  Disabled  503  │  │  ReversalReport.warnings│ │
//! │  │  Conflict   409 │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Side effects (inventory, invoices) report failures as data on the
//! operation's result. Only the primary operation's failure is an error.

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use apothecary_core::{CoreError, TransactionStatus};
use apothecary_db::DbError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Client Errors
    // =========================================================================
    /// Input rejected before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Cannot move a transaction from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Customer has no email address")]
    MissingCustomerEmail,

    #[error("Authentication required")]
    Unauthenticated,

    /// Discount beyond the actor's role limits.
    #[error("Discount not allowed: {reason}")]
    DiscountNotAllowed { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Stale save, closed draft, or invoice work in flight.
    #[error("Conflict: {0}")]
    Conflict(String),

    // =========================================================================
    // Server Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(DbError),

    #[error("Invoice storage error: {0}")]
    Storage(String),

    #[error("Invoice generation failed: {0}")]
    InvoiceFailed(String),

    #[error("Email delivery failed for {to}")]
    EmailDelivery { to: String },

    #[error("Email delivery is disabled")]
    EmailDisabled,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// HTTP status for the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_)
            | EngineError::InvalidId(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::MissingCustomerEmail => 400,
            EngineError::Unauthenticated => 401,
            EngineError::DiscountNotAllowed { .. } => 403,
            EngineError::NotFound { .. } => 404,
            EngineError::Conflict(_) => 409,
            EngineError::EmailDisabled => 503,
            EngineError::Database(_)
            | EngineError::Storage(_)
            | EngineError::InvoiceFailed(_)
            | EngineError::EmailDelivery { .. }
            | EngineError::InvalidConfig(_)
            | EngineError::ConfigLoadFailed(_)
            | EngineError::ConfigSaveFailed(_)
            | EngineError::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation(_) | EngineError::MissingCustomerEmail => {
                ErrorCode::ValidationError
            }
            EngineError::InvalidId(_) => ErrorCode::InvalidId,
            EngineError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            EngineError::Unauthenticated => ErrorCode::Unauthenticated,
            EngineError::DiscountNotAllowed { .. } => ErrorCode::DiscountNotAllowed,
            EngineError::NotFound { .. } => ErrorCode::NotFound,
            EngineError::Conflict(_) => ErrorCode::Conflict,
            EngineError::Database(_) => ErrorCode::DatabaseError,
            EngineError::Storage(_) | EngineError::InvoiceFailed(_) => ErrorCode::InvoiceError,
            EngineError::EmailDelivery { .. } => ErrorCode::EmailError,
            EngineError::EmailDisabled => ErrorCode::ServiceUnavailable,
            EngineError::InvalidConfig(_)
            | EngineError::ConfigLoadFailed(_)
            | EngineError::ConfigSaveFailed(_)
            | EngineError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for 5xx errors; these are logged when converted for a response.
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Response body for the transport layer.
    pub fn to_api_error(&self) -> ApiError {
        if self.is_server_error() {
            error!(code = ?self.code(), "Request failed: {}", self);
        }
        ApiError {
            status: self.status_code(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

// =============================================================================
// Wire Shape
// =============================================================================

/// Error body returned to clients.
///
/// ```json
/// { "status": 404, "code": "NOT_FOUND", "message": "Transaction not found: …" }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InvalidId,
    InvalidTransition,
    Unauthenticated,
    DiscountNotAllowed,
    NotFound,
    Conflict,
    DatabaseError,
    InvoiceError,
    EmailError,
    ServiceUnavailable,
    Internal,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        err.to_api_error()
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            DbError::StaleWrite { entity, id } => EngineError::Conflict(format!(
                "{} {} was modified concurrently, reload and retry",
                entity, id
            )),
            DbError::Conflict(message) => EngineError::Conflict(message),
            DbError::UniqueViolation { field, value } => {
                EngineError::Conflict(format!("{} '{}' already exists", field, value))
            }
            other => EngineError::Database(other),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TransactionNotFound(id) => EngineError::not_found("Transaction", id),
            CoreError::InvalidTransition { from, to } => {
                EngineError::InvalidTransition { from, to }
            }
            other @ (CoreError::TooManyItems { .. } | CoreError::QuantityTooLarge { .. }) => {
                EngineError::Validation(other.to_string())
            }
            CoreError::Validation(e) => EngineError::Validation(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

impl From<apothecary_core::ValidationError> for EngineError {
    fn from(err: apothecary_core::ValidationError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apothecary_core::ValidationError;

    #[test]
    fn test_status_codes() {
        assert_eq!(EngineError::Validation("x".into()).status_code(), 400);
        assert_eq!(EngineError::Unauthenticated.status_code(), 401);
        assert_eq!(
            EngineError::DiscountNotAllowed { reason: "limit".into() }.status_code(),
            403
        );
        assert_eq!(EngineError::not_found("Transaction", "abc").status_code(), 404);
        assert_eq!(EngineError::Conflict("busy".into()).status_code(), 409);
        assert_eq!(EngineError::EmailDisabled.status_code(), 503);
        assert_eq!(EngineError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_db_errors_map_to_client_errors() {
        let err: EngineError = DbError::stale("Transaction", "t1").into();
        assert_eq!(err.status_code(), 409);

        let err: EngineError = DbError::not_found("Transaction", "t1").into();
        assert_eq!(err.status_code(), 404);

        let err: EngineError = DbError::PoolExhausted.into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.code(), ErrorCode::DatabaseError);
    }

    #[test]
    fn test_core_errors_map_to_400() {
        let err: EngineError = CoreError::InvalidTransition {
            from: TransactionStatus::Completed,
            to: TransactionStatus::Draft,
        }
        .into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.code(), ErrorCode::InvalidTransition);

        let err: EngineError = CoreError::Validation(ValidationError::Required {
            field: "items[0].name".into(),
        })
        .into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_api_error_serialization() {
        let api: ApiError = EngineError::not_found("Transaction", "t1").into();
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["status"], 404);
        assert_eq!(json["code"], "NOT_FOUND");
    }
}
