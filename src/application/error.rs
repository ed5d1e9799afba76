use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_)
            | AppError::Validation(_)
            | AppError::Json(_)
            | AppError::Yaml(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Process(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to API clients
    fn detail(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::Process(msg) => msg.clone(),
            AppError::Validation(e) => format!("Invalid request: {}", e),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        }
        (status, Json(ErrorResponse { detail: self.detail() })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn get_response_body(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        let body_str = String::from_utf8(bytes.to_vec()).unwrap();
        (status, body_str)
    }

    #[tokio::test]
    async fn test_not_found_error() {
        let error = AppError::NotFound("Install not found".to_string());
        let (status, body) = get_response_body(error.into_response()).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Install not found"));
    }

    #[tokio::test]
    async fn test_bad_request_error() {
        let error = AppError::BadRequest("installID is required".to_string());
        let (status, body) = get_response_body(error.into_response()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("installID is required"));
    }

    #[tokio::test]
    async fn test_conflict_error() {
        let error = AppError::Conflict("stage already finished".to_string());
        let (status, _) = get_response_body(error.into_response()).await;

        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_process_error_is_internal() {
        let error = AppError::Process("failed to spawn conda".to_string());
        let (status, body) = get_response_body(error.into_response()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("failed to spawn conda"));
    }

    #[tokio::test]
    async fn test_json_error_response_format() {
        let error = AppError::NotFound("Resource not found".to_string());
        let (_, body) = get_response_body(error.into_response()).await;

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.get("detail").unwrap(), "Resource not found");
    }

    #[test]
    fn test_error_display_impl() {
        assert_eq!(
            AppError::NotFound("test".to_string()).to_string(),
            "Not found: test"
        );
        assert_eq!(
            AppError::Process("test".to_string()).to_string(),
            "Process error: test"
        );
        assert_eq!(
            AppError::ServiceUnavailable("test".to_string()).to_string(),
            "Service unavailable: test"
        );
    }

    #[test]
    fn test_parse_errors_are_client_errors() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(AppError::from(json_err).status_code(), StatusCode::BAD_REQUEST);

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(AppError::from(io_err).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_error: AppError = io_err.into();
        assert!(matches!(app_error, AppError::Io(_)));
    }

    #[test]
    fn test_yaml_error_from_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("{ not: [a list").unwrap_err();
        let app_error: AppError = yaml_err.into();
        assert!(matches!(app_error, AppError::Yaml(_)));
    }
}
