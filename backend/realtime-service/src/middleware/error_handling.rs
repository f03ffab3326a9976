use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_types as kinds, ErrorResponse};

/// Map a domain error onto the shared error envelope.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let error_type = match err {
        AppError::Validation(_) => kinds::VALIDATION_ERROR,
        AppError::Unauthorized => kinds::AUTHENTICATION_ERROR,
        AppError::Forbidden => kinds::AUTHORIZATION_ERROR,
        AppError::NotFound(_) => kinds::NOT_FOUND_ERROR,
        AppError::RateLimited => kinds::RATE_LIMIT_ERROR,
        AppError::ServiceUnavailable(_) => kinds::SERVICE_UNAVAILABLE_ERROR,
        AppError::Config(_) | AppError::StartServer(_) | AppError::Database(_) | AppError::Internal => {
            kinds::SERVER_ERROR
        }
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &err.client_message(),
        status.as_u16(),
        error_type,
        err.error_code(),
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, body) = map_error(err);
    HttpResponse::build(status).json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;

    #[test]
    fn test_not_found_maps_to_404_envelope() {
        let (status, body) = map_error(&AppError::NotFound(Resource::Conversation));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "Not Found");
        assert_eq!(body.error_type, "not_found_error");
        assert_eq!(body.code, "CONVERSATION_NOT_FOUND");
    }

    #[test]
    fn test_database_error_message_is_generic() {
        let (status, body) = map_error(&AppError::Database("deadlock detected".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.message.contains("deadlock"));
    }

    #[test]
    fn test_rate_limited_is_429() {
        let (status, body) = map_error(&AppError::RateLimited);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.code, "RATE_LIMIT_EXCEEDED");
    }
}
