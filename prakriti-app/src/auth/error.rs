//! Uniform error contract for every API failure
//!
//! Whatever went wrong (no response, an HTTP error status, an unusable body)
//! callers only ever see [`ApiError`]: `{ message, code, statusCode, details }`
//! plus an [`ErrorKind`] classification.

use prakriti_core::types::{ErrorEnvelope, ErrorField, FieldError};
use reqwest::StatusCode;

use super::transport::TransportError;

/// Last-resort message when nothing better is available
pub const DEFAULT_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Message used when the server sent a structured error without a message
pub const STRUCTURED_ERROR_MESSAGE: &str = "An error occurred";

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";
pub const SESSION_EXPIRED_CODE: &str = "SESSION_EXPIRED";

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response reached the client
    Transport,
    /// 401 that could not be recovered by a refresh
    Unauthorized,
    /// Refresh failed, local credentials were cleared
    SessionExpired,
    /// 400 / 422 with field level details
    Validation,
    Forbidden,
    NotFound,
    /// 409 duplicate resource
    Conflict,
    /// 5xx
    Server,
    /// Any other non-success status
    Http,
    /// Success status with a body that does not match the envelope
    Decode,
    /// Success status with `success: false` or no data
    Rejected,
}

impl ErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 | 422 => ErrorKind::Validation,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Http,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub code: Option<String>,
    pub status_code: Option<u16>,
    pub details: Vec<FieldError>,
    pub kind: ErrorKind,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status_code: None,
            details: Vec::new(),
            kind,
        }
    }

    /// Failure where no response reached us. Carries no code.
    pub fn transport(err: TransportError) -> Self {
        let message = if err.message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            err.message
        };
        Self::new(ErrorKind::Transport, message)
    }

    /// Normalize a non-success HTTP response.
    ///
    /// Priority: the structured `error` object, then a plain `message` (or
    /// string `error`) in the body, then the transport-level status text.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let kind = ErrorKind::from_status(status);
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();

        if let Some(ErrorField::Structured(err)) = envelope.error {
            return Self {
                message: err
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| STRUCTURED_ERROR_MESSAGE.to_string()),
                code: err.code,
                status_code: err.status_code.or(Some(status.as_u16())),
                details: err.details,
                kind,
            };
        }

        let message = envelope
            .message
            .filter(|m| !m.is_empty())
            .or(match envelope.error {
                Some(ErrorField::Text(text)) if !text.is_empty() => Some(text),
                _ => None,
            })
            .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()));

        Self {
            message,
            code: None,
            status_code: Some(status.as_u16()),
            details: Vec::new(),
            kind,
        }
    }

    /// Success status whose envelope reported `success: false` or carried no data
    pub fn rejected(reason: Option<&str>, fallback: &str, status: StatusCode) -> Self {
        let message = reason
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_string();
        Self {
            status_code: Some(status.as_u16()),
            ..Self::new(ErrorKind::Rejected, message)
        }
    }

    pub fn decode(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Decode, format!("Invalid response from server: {}", err))
    }

    pub fn encode(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Decode, format!("Invalid request body: {}", err))
    }

    /// Terminal failure after the refresh protocol gave up
    pub fn session_expired() -> Self {
        Self {
            code: Some(SESSION_EXPIRED_CODE.to_string()),
            status_code: Some(StatusCode::UNAUTHORIZED.as_u16()),
            ..Self::new(ErrorKind::SessionExpired, SESSION_EXPIRED_MESSAGE)
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.kind, ErrorKind::Unauthorized | ErrorKind::SessionExpired)
    }

    /// Only transport failures are worth retrying, and that is left to the caller
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transport
    }

    /// Field named by a 409 duplicate error, when the server reported one
    pub fn conflict_field(&self) -> Option<&str> {
        if self.kind != ErrorKind::Conflict {
            return None;
        }
        self.details
            .iter()
            .map(|d| d.field.as_str())
            .find(|f| !f.is_empty())
    }

    /// Message for a given form field, for inline display
    pub fn field_message(&self, field: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|d| d.field == field)
            .map(|d| d.message.as_str())
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::transport(err)
    }
}

/// Failures surfaced by the session store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Another login/register/verify/refresh is still in flight
    #[error("another session transition is already in progress")]
    Busy,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error(transparent)]
    Api(#[from] ApiError),
}
