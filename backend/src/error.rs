//! Error handling for the purchase ledger
//!
//! Every error leaves the server as `{ "error": { code, message, field, details } }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use shared::DeliveryValidationError;
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Delivery rejected: {0}")]
    DeliveryRejected(#[from] DeliveryValidationError),

    // Duplicate / concurrency errors
    #[error("Duplicate submission: delivery #{sequence} recorded {age_secs}s ago")]
    DuplicateSubmission {
        existing_id: Uuid,
        sequence: i32,
        age_secs: i64,
    },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Conflict: {message}")]
    Conflict { resource: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Pipeline errors
    #[error("Delivery #{sequence} recorded but not allocated: {reason}")]
    PartialFailure {
        delivery_id: Uuid,
        sequence: i32,
        reason: String,
    },

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorDetail {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
            details: None,
        }
    }

    fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DeliveryRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateSubmission { .. }
            | AppError::DuplicateEntry(_)
            | AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PartialFailure { .. } => StatusCode::MULTI_STATUS,
            AppError::DatabaseError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> ErrorDetail {
        match self {
            AppError::Validation { field, message } => {
                ErrorDetail::new("VALIDATION_ERROR", message.clone()).field(field.clone())
            }
            AppError::ValidationError(msg) => ErrorDetail::new("VALIDATION_ERROR", msg.clone()),
            AppError::DeliveryRejected(err) => {
                let detail = ErrorDetail::new(err.code(), err.to_string());
                let detail = match err.field() {
                    Some(field) => detail.field(field),
                    None => detail,
                };
                match err {
                    DeliveryValidationError::ExceedsRemainingBalance {
                        amount,
                        remaining,
                        excess,
                    } => detail.details(json!({
                        "amount": amount,
                        "remaining": remaining,
                        "excess": excess,
                    })),
                    DeliveryValidationError::QuantityExceedsRemaining {
                        item_id,
                        requested,
                        remaining,
                    } => detail.details(json!({
                        "item_id": item_id,
                        "requested": requested,
                        "remaining": remaining,
                    })),
                    DeliveryValidationError::InsufficientStock {
                        product_id,
                        available,
                        required,
                    } => detail.details(json!({
                        "product_id": product_id,
                        "available": available,
                        "required": required,
                    })),
                    _ => detail,
                }
            }
            AppError::DuplicateSubmission {
                existing_id,
                sequence,
                age_secs,
            } => ErrorDetail::new(
                "DUPLICATE_SUBMISSION",
                format!(
                    "A delivery with the same amount was recorded {}s ago as #{}",
                    age_secs, sequence
                ),
            )
            .details(json!({ "existing_delivery_id": existing_id, "delivery_sequence": sequence })),
            AppError::DuplicateEntry(field) => ErrorDetail::new(
                "DUPLICATE_ENTRY",
                format!("A record with this {} already exists", field),
            )
            .field(field.clone()),
            AppError::Conflict { resource, message } => {
                ErrorDetail::new("CONFLICT", message.clone()).field(resource.clone())
            }
            AppError::NotFound(resource) => {
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource))
            }
            AppError::PartialFailure {
                delivery_id,
                sequence,
                reason,
            } => ErrorDetail::new(
                "ALLOCATION_PENDING",
                format!(
                    "Delivery #{} was recorded but inventory was not updated; retry allocation",
                    sequence
                ),
            )
            .details(json!({
                "delivery_id": delivery_id,
                "delivery_sequence": sequence,
                "reason": reason,
                "retry": format!("/api/v1/deliveries/{}/allocate", delivery_id),
            })),
            AppError::DatabaseError(_) => {
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred")
            }
            AppError::Internal(msg) => ErrorDetail::new("INTERNAL_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log the error for debugging
        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: self.detail() })).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        match field_errors.iter().next() {
            Some((field, errs)) => AppError::Validation {
                field: field.to_string(),
                message: errs
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for {}", field)),
            },
            None => AppError::ValidationError(errors.to_string()),
        }
    }
}

/// Name of the unique constraint a failed statement ran into, if that is what failed
pub fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_rejected_delivery_maps_to_unprocessable() {
        let err = AppError::from(DeliveryValidationError::ExceedsRemainingBalance {
            amount: Decimal::from(7_000),
            remaining: Decimal::from(6_000),
            excess: Decimal::from(1_000),
        });
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let detail = err.detail();
        assert_eq!(detail.code, "AMOUNT_EXCEEDS_REMAINING");
        let details = detail.details.unwrap();
        assert_eq!(details["excess"], json!("1000"));
    }

    #[test]
    fn test_partial_failure_points_at_retry() {
        let id = Uuid::new_v4();
        let err = AppError::PartialFailure {
            delivery_id: id,
            sequence: 2,
            reason: "timeout".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::MULTI_STATUS);
        let details = err.detail().details.unwrap();
        assert_eq!(
            details["retry"],
            json!(format!("/api/v1/deliveries/{}/allocate", id))
        );
    }

    #[test]
    fn test_duplicate_and_conflict_are_409() {
        let dup = AppError::DuplicateSubmission {
            existing_id: Uuid::new_v4(),
            sequence: 1,
            age_secs: 3,
        };
        let conflict = AppError::Conflict {
            resource: "correction".to_string(),
            message: "busy".to_string(),
        };
        assert_eq!(dup.status_code(), StatusCode::CONFLICT);
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(dup.detail().code, "DUPLICATE_SUBMISSION");
    }
}
