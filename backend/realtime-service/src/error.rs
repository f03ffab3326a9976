use crate::middleware::error_handling;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Entity a `NotFound` refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Conversation,
    Message,
    User,
    Notification,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Conversation => "conversation",
            Resource::Message => "message",
            Resource::User => "user",
            Resource::Notification => "notification",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("database error: {0}")]
    Database(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::ServiceUnavailable(e.to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        tracing::error!(error = %e, "serialization failure");
        AppError::Internal
    }
}

impl AppError {
    /// Store and transport failures; the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::ServiceUnavailable(_) | AppError::Internal
        )
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound(_) => 404,
            AppError::RateLimited => 429,
            AppError::ServiceUnavailable(_) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        use error_types::error_codes;
        match self {
            AppError::Validation(_) => error_codes::VALIDATION_FAILED,
            AppError::Unauthorized => error_codes::TOKEN_INVALID,
            AppError::Forbidden => error_codes::FORBIDDEN,
            AppError::NotFound(Resource::Conversation) => error_codes::CONVERSATION_NOT_FOUND,
            AppError::NotFound(Resource::Message) => error_codes::MESSAGE_NOT_FOUND,
            AppError::NotFound(Resource::User) => error_codes::USER_NOT_FOUND,
            AppError::NotFound(Resource::Notification) => error_codes::NOTIFICATION_NOT_FOUND,
            AppError::RateLimited => error_codes::RATE_LIMIT_ERROR,
            AppError::Database(_) => error_codes::DATABASE_ERROR,
            AppError::ServiceUnavailable(_) => error_codes::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
                error_codes::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show a client. Store failures are reported generically.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::ServiceUnavailable(_) => {
                "temporarily unavailable, please retry".to_string()
            }
            AppError::Config(_) | AppError::StartServer(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_retryable_unavailable() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!AppError::Forbidden.is_retryable());
        assert!(!AppError::Validation("x".into()).is_retryable());
        assert!(!AppError::NotFound(Resource::Message).is_retryable());
    }

    #[test]
    fn test_not_found_codes_name_the_resource() {
        assert_eq!(
            AppError::NotFound(Resource::Conversation).error_code(),
            "CONVERSATION_NOT_FOUND"
        );
        assert_eq!(
            AppError::NotFound(Resource::Message).to_string(),
            "message not found"
        );
    }

    #[test]
    fn test_store_failures_hidden_from_clients() {
        let err = AppError::Database("relation \"messages\" does not exist".into());
        assert!(!err.client_message().contains("relation"));
    }
}
