//! Error types for web handlers.
//!
//! [`AppError`] bridges [`AllocError`] and HTTP responses. Every error body
//! has the shape `{ "code": ..., "message": ... }`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use softlock_core::AllocError;
use std::fmt;
use std::time::Duration;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```
/// use axum::http::StatusCode;
/// use softlock_core::AllocError;
/// use softlock_web::AppError;
///
/// let err = AppError::from(AllocError::HoldExpired);
/// assert_eq!(err.status(), StatusCode::GONE);
/// assert_eq!(err.code(), "HOLD_EXPIRED");
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Sent as `Retry-After` (whole seconds, rounded up)
    retry_after: Option<Duration>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            retry_after: None,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            message,
        )
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<AllocError> for AppError {
    fn from(err: AllocError) -> Self {
        let message = err.to_string();
        let (status, code) = match err.root_cause() {
            AllocError::InsufficientInventory { .. } => {
                (StatusCode::CONFLICT, "INSUFFICIENT_INVENTORY")
            }
            AllocError::AlreadyLocked { .. } => (StatusCode::CONFLICT, "ALREADY_LOCKED"),
            AllocError::DuplicateOrder { .. } => (StatusCode::CONFLICT, "DUPLICATE_ORDER"),
            AllocError::AdminConflict { .. } => (StatusCode::CONFLICT, "ADMIN_CONFLICT"),
            AllocError::HoldExpired => (StatusCode::GONE, "HOLD_EXPIRED"),
            AllocError::HoldNotOwned { .. } => (StatusCode::FORBIDDEN, "HOLD_NOT_OWNED"),
            AllocError::UnknownTier(_) => (StatusCode::NOT_FOUND, "UNKNOWN_TIER"),
            AllocError::ValidationError(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
            }
            AllocError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            AllocError::StoreUnavailable(_) | AllocError::ReservationFailed { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
        };

        let retry_after = match err.root_cause() {
            AllocError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };

        let mut app = Self::new(status, code, message);
        app.retry_after = retry_after;
        if err.is_retryable() {
            app = app.with_source(anyhow::Error::new(err));
        }
        app
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();

        if let Some(retry_after) = self.retry_after {
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use softlock_core::{CheckoutId, TierId, UnitId};

    #[test]
    fn test_error_display() {
        let err = AppError::validation("Invalid input");
        assert_eq!(err.to_string(), "[VALIDATION_ERROR] Invalid input");
    }

    #[test]
    fn test_alloc_error_statuses() {
        let cases = [
            (
                AllocError::InsufficientInventory {
                    tier: TierId::new("gold"),
                    requested: 2,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                AllocError::AlreadyLocked {
                    unit: UnitId::new("lottery", 42),
                },
                StatusCode::CONFLICT,
            ),
            (AllocError::HoldExpired, StatusCode::GONE),
            (
                AllocError::HoldNotOwned {
                    checkout_id: CheckoutId::new(),
                },
                StatusCode::FORBIDDEN,
            ),
            (AllocError::UnknownTier(TierId::new("x")), StatusCode::NOT_FOUND),
            (
                AllocError::ValidationError("bad".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AllocError::StoreUnavailable("redis".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_reservation_failure_maps_by_root_cause() {
        let err = AllocError::ReservationFailed {
            index: 1,
            source: Box::new(AllocError::AlreadyLocked {
                unit: UnitId::new("lottery", 7),
            }),
        };
        let app = AppError::from(err);
        assert_eq!(app.status(), StatusCode::CONFLICT);
        assert_eq!(app.code(), "ALREADY_LOCKED");
        assert!(app.to_string().contains("item 1"));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let err = AllocError::RateLimited {
            retry_after: Duration::from_millis(2_500),
        };
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");
    }
}
