use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Pipeline stage at which a request crossed its size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Headers,
    Body,
    Trailers,
}

/// Rejection produced when a request exceeds its cumulative size limit.
///
/// `actual_size` is the running total at the moment the limit was crossed,
/// not the size the complete request would have had.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizeGuardError {
    #[error("Request headers too large: {actual_size} bytes exceeds the maximum of {max_size} bytes")]
    HeadersTooLarge { max_size: u64, actual_size: u64 },
    #[error("Request body too large: {actual_size} bytes exceeds the maximum of {max_size} bytes")]
    BodyTooLarge { max_size: u64, actual_size: u64 },
    #[error("Request trailers too large: {actual_size} bytes exceeds the maximum of {max_size} bytes")]
    TrailersTooLarge { max_size: u64, actual_size: u64 },
}

impl SizeGuardError {
    pub fn limit_exceeded(stage: Stage, max_size: u64, actual_size: u64) -> Self {
        match stage {
            Stage::Headers => SizeGuardError::HeadersTooLarge { max_size, actual_size },
            Stage::Body => SizeGuardError::BodyTooLarge { max_size, actual_size },
            Stage::Trailers => SizeGuardError::TrailersTooLarge { max_size, actual_size },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            SizeGuardError::HeadersTooLarge { .. } => Stage::Headers,
            SizeGuardError::BodyTooLarge { .. } => Stage::Body,
            SizeGuardError::TrailersTooLarge { .. } => Stage::Trailers,
        }
    }

    pub fn max_size(&self) -> u64 {
        match self {
            SizeGuardError::HeadersTooLarge { max_size, .. }
            | SizeGuardError::BodyTooLarge { max_size, .. }
            | SizeGuardError::TrailersTooLarge { max_size, .. } => *max_size,
        }
    }

    pub fn actual_size(&self) -> u64 {
        match self {
            SizeGuardError::HeadersTooLarge { actual_size, .. }
            | SizeGuardError::BodyTooLarge { actual_size, .. }
            | SizeGuardError::TrailersTooLarge { actual_size, .. } => *actual_size,
        }
    }

    /// 431 when the header block alone crossed the limit, 413 otherwise.
    pub fn status(&self) -> StatusCode {
        match self.stage() {
            Stage::Headers => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Stage::Body | Stage::Trailers => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn message(&self) -> &'static str {
        match self.stage() {
            Stage::Headers => "Request header fields too large",
            Stage::Body | Stage::Trailers => "Payload too large",
        }
    }
}

/// JSON body of a rejection response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: String,
    pub stage: Stage,
    pub status_code: u16,
}

impl IntoResponse for SizeGuardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = ErrorResponse {
            error: status.to_string(),
            message: self.message().to_string(),
            details: format!(
                "Request size: {} bytes, Maximum allowed: {} bytes",
                self.actual_size(),
                self.max_size()
            ),
            stage: self.stage(),
            status_code: status.as_u16(),
        };

        (status, axum::Json(error_response)).into_response()
    }
}

/// How a rejection is rendered to the client.
#[derive(Default)]
pub enum ErrorFormat {
    /// JSON body built from [`ErrorResponse`].
    #[default]
    SimpleJson,
    PlainText,
    Custom(Box<dyn Fn(SizeGuardError) -> Response + Send + Sync>),
}

impl ErrorFormat {
    pub fn handle_error(&self, error: SizeGuardError) -> Response {
        match self {
            ErrorFormat::SimpleJson => error.into_response(),
            ErrorFormat::PlainText => {
                let status = error.status();
                let body = format!(
                    "{}\n\nRequest size: {} bytes\nMaximum allowed: {} bytes",
                    status,
                    error.actual_size(),
                    error.max_size()
                );
                (status, body).into_response()
            }
            ErrorFormat::Custom(handler) => handler(error),
        }
    }
}

impl std::fmt::Debug for ErrorFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorFormat::SimpleJson => f.write_str("SimpleJson"),
            ErrorFormat::PlainText => f.write_str("PlainText"),
            ErrorFormat::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Startup-time configuration failure. Never produced per request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing `max_bytes` for {0}")]
    MissingMaxBytes(String),
    #[error("`max_bytes` must be greater than zero for {0}")]
    ZeroMaxBytes(String),
    #[error("route `path_prefix` must start with '/', got '{0}'")]
    InvalidPathPrefix(String),
    #[error("unknown error format '{0}', expected \"json\" or \"text\"")]
    UnknownErrorFormat(String),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}
