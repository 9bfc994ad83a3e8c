//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **`AppError`**: failures on the HTTP surface (startup configuration, the
//!   websocket upgrade request). These convert into JSON HTTP responses.
//! - **Session errors**: `TransportError`, `UpstreamError` and `MalformedInput`.
//!   None of them ever escape a session; each is recovered where it happens
//!   (see the table below).
//!
//! ## Recovery rules inside a session:
//! | Error            | Where it is handled                                       |
//! |------------------|-----------------------------------------------------------|
//! | `TransportError` | logged and swallowed; the consumer aborts its loop        |
//! | `UpstreamError`  | transcription: utterance dropped; LLM: fallback reply;    |
//! |                  | synthesis: current consumer aborted, session continues    |
//! | `MalformedInput` | the single frame is dropped with a warning                |

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned from HTTP handlers and startup code.
///
/// ## Error Categories:
/// - **Unavailable**: Session capacity exhausted (503 errors)
/// - **ConfigError**: Configuration or credential problems (500 errors)
#[derive(Debug)]
pub enum AppError {
    Unavailable(String),
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "unavailable",
///     "message": "Maximum concurrent sessions (10) reached",
///     "timestamp": "2026-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Unavailable(msg) => ("unavailable", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failure to deliver a frame to the connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection actor is gone (client disconnected or socket stopped).
    Closed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed(msg) => write!(f, "client connection closed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Which external collaborator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamService {
    Transcription,
    LanguageModel,
    Synthesis,
}

impl UpstreamService {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamService::Transcription => "transcription",
            UpstreamService::LanguageModel => "language_model",
            UpstreamService::Synthesis => "synthesis",
        }
    }
}

/// A transcription, language-model or synthesis call failed (before or mid-stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub service: UpstreamService,
    pub message: String,
}

impl UpstreamError {
    pub fn new(service: UpstreamService, err: impl fmt::Display) -> Self {
        Self {
            service,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} service failed: {}", self.service.as_str(), self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// An inbound frame that cannot be turned into audio samples or a text turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedInput {
    Empty,
    /// Byte length is not a whole number of samples.
    TruncatedSample { len: usize, sample_width: usize },
    InvalidBase64(String),
    InvalidJson(String),
}

impl fmt::Display for MalformedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedInput::Empty => write!(f, "empty payload"),
            MalformedInput::TruncatedSample { len, sample_width } => write!(
                f,
                "payload of {} bytes is not a multiple of the {}-byte sample width",
                len, sample_width
            ),
            MalformedInput::InvalidBase64(msg) => write!(f, "invalid base64 audio: {}", msg),
            MalformedInput::InvalidJson(msg) => write!(f, "invalid message: {}", msg),
        }
    }
}

impl std::error::Error for MalformedInput {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let unavailable = AppError::Unavailable("full".to_string());
        assert_eq!(unavailable.error_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let config = AppError::ConfigError("missing key".to_string());
        assert_eq!(config.error_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_upstream_error_display_names_service() {
        let err = UpstreamError::new(UpstreamService::Synthesis, "503 from upstream");
        assert_eq!(err.to_string(), "synthesis service failed: 503 from upstream");
    }
}
