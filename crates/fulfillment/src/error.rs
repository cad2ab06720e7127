//! Unified error handling for the fulfillment service.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::db::RepositoryError;
use crate::provider::ProviderError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request or product configuration is invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate submission or an operation the current status forbids.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider answered with a non-2xx status.
    #[error("Provider error: {0}")]
    Upstream(String),

    /// No usable credential, provider timeout, or provider outage.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid or missing webhook signature.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A webhook transition failed after the event was claimed.
    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Database error: {0}")]
    Database(#[source] RepositoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Processing(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Processing(_) | Self::Database(_) | Self::Internal(_) | Self::Upstream(_)
        )
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound("Record not found".to_string()),
            RepositoryError::Conflict(message) => Self::Conflict(message),
            other => Self::Database(other),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(message) => Self::NotFound(message),
            ProviderError::Timeout
            | ProviderError::Unavailable(_)
            | ProviderError::RateLimited(_)
            | ProviderError::NoCredentials(_) => Self::ServiceUnavailable(err.to_string()),
            ProviderError::CredentialLookup(message) => Self::Internal(message),
            ProviderError::Upstream { .. }
            | ProviderError::Unauthorized(_)
            | ProviderError::Http(_)
            | ProviderError::Parse(_) => Self::Upstream(err.to_string()),
        }
    }
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Fulfillment request error"
            );
        }

        let status = self.status_code();

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) | Self::Processing(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order-123".to_string());
        assert_eq!(err.to_string(), "Not found: order-123");

        let err = AppError::Conflict("Order item already submitted".to_string());
        assert_eq!(err.to_string(), "Conflict: Order item already submitted");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(get_status(AppError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(get_status(AppError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(get_status(AppError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(get_status(AppError::Upstream("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            get_status(AppError::ServiceUnavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(get_status(AppError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(
            get_status(AppError::Processing("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_repository_error_mapping() {
        assert!(matches!(
            AppError::from(RepositoryError::Conflict("dup".into())),
            AppError::Conflict(_)
        ));
        assert!(matches!(AppError::from(RepositoryError::NotFound), AppError::NotFound(_)));
        assert!(matches!(
            AppError::from(RepositoryError::DataCorruption("bad".into())),
            AppError::Database(_)
        ));
    }

    #[test]
    fn test_provider_error_mapping() {
        assert!(matches!(AppError::from(ProviderError::Timeout), AppError::ServiceUnavailable(_)));
        assert!(matches!(
            AppError::from(ProviderError::RateLimited(5)),
            AppError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            AppError::from(ProviderError::Upstream {
                status: 400,
                message: "bad".into()
            }),
            AppError::Upstream(_)
        ));
        assert!(matches!(
            AppError::from(ProviderError::NotFound("x".into())),
            AppError::NotFound(_)
        ));
    }
}
