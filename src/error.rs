use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// Covers the failure modes of the messaging core: protocol violations on the
/// wire, store failures, and authentication failures on the history endpoint
/// and the WebSocket handshake.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Persistence =====
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // ===== Serialization =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== WebSocket =====
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ===== Authentication =====
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // ===== Validation =====
    #[error("Validation error: {0}")]
    Validation(String),

    // ===== Configuration =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::WebSocket(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-facing error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth(msg) => format!("Authentication failed: {}", msg),
            AppError::Jwt(_) => "Invalid or expired token".to_string(),
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            AppError::Database(_) => "Database error".to_string(),
            AppError::WebSocket(_) => "WebSocket connection error".to_string(),
            AppError::Json(_) => "Malformed request".to_string(),
            AppError::Config(msg) => format!("Configuration error: {}", msg),
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Jwt(_) => "JWT_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::WebSocket(_) => "WEBSOCKET_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            _ => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Convert AppError to a hyper JSON response for the HTTP endpoints.
    pub fn to_hyper_response(self) -> Response<Full<Bytes>> {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        // Server errors never expose internal details to the client
        let response_body = if status.is_server_error() {
            json!({
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "error_code": error_code,
                "status": status.as_u16(),
            })
        };

        let json_bytes = serde_json::to_vec(&response_body)
            .unwrap_or_else(|_| b"{\"error\":\"Internal server error\"}".to_vec());

        let mut response = Response::new(Full::new(Bytes::from(json_bytes)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            "content-type",
            hyper::header::HeaderValue::from_static("application/json"),
        );

        response
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::WebSocket(err.to_string())
    }
}
