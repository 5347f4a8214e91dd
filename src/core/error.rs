//! Typed error handling for the relay server
//!
//! Each failure domain gets its own category enum so callers can match on
//! specific conditions instead of unwrapping a generic `anyhow::Error`:
//!
//! - [`ConfigError`]: startup configuration problems (fatal)
//! - [`EnvelopeError`]: a frame that is not a valid envelope (recovered locally)
//! - [`StoreError`]: message store I/O (recovered locally; see the append
//!   trade-off documented on the chat application)
//! - [`SessionError`]: per-connection failures (surface via the close path)
//! - [`RequestError`]: malformed HTTP facade input (4xx)
//!
//! The HTTP layer maps every error to `{"error": "<code>"}` with the
//! matching status code via [`IntoResponse`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;

/// The top-level error type for the relay server.
#[derive(Debug)]
pub enum RelayError {
    /// Startup configuration errors.
    Config(ConfigError),

    /// Envelope decode/encode errors.
    Envelope(EnvelopeError),

    /// Message store errors.
    Store(StoreError),

    /// Per-session transport errors.
    Session(SessionError),

    /// Malformed HTTP facade requests.
    Request(RequestError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Config(e) => write!(f, "{}", e),
            RelayError::Envelope(e) => write!(f, "{}", e),
            RelayError::Store(e) => write!(f, "{}", e),
            RelayError::Session(e) => write!(f, "{}", e),
            RelayError::Request(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Config(e) => Some(e),
            RelayError::Envelope(e) => Some(e),
            RelayError::Store(e) => Some(e),
            RelayError::Session(e) => Some(e),
            RelayError::Request(e) => Some(e),
        }
    }
}

/// Error body returned by the HTTP facade: `{"error": "<code>"}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable snake_case error code for programmatic handling.
    pub error: String,
}

impl RelayError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Envelope(_) => StatusCode::BAD_REQUEST,
            RelayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Request(e) => e.status_code(),
        }
    }

    /// Stable error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::Config(e) => e.error_code(),
            RelayError::Envelope(e) => e.error_code(),
            RelayError::Store(_) => "store_unavailable",
            RelayError::Session(e) => e.error_code(),
            RelayError::Request(e) => e.error_code(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

// =============================================================================
// Config errors
// =============================================================================

/// Errors raised while loading or validating configuration. All fatal.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse the configuration file.
    Parse { file: String, message: String },

    /// Listen port outside the allowed 1024-65535 range.
    InvalidPort { port: u16 },

    /// I/O error while reading the configuration file.
    Io { path: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { file, message } => {
                write!(f, "Failed to parse config file '{}': {}", file, message)
            }
            ConfigError::InvalidPort { port } => {
                write!(f, "Port {} out of range (1024-65535)", port)
            }
            ConfigError::Io { path, message } => {
                write!(f, "Failed to read config file '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        "config_invalid"
    }
}

impl From<ConfigError> for RelayError {
    fn from(err: ConfigError) -> Self {
        RelayError::Config(err)
    }
}

// =============================================================================
// Envelope errors
// =============================================================================

/// Errors raised by the envelope codec.
#[derive(Debug)]
pub enum EnvelopeError {
    /// The frame is not valid JSON or not a JSON object.
    InvalidJson { message: String },

    /// The `type` field is missing or empty.
    MissingType,

    /// A duplicate payload key was found while encoding.
    DuplicateKey { key: String },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::InvalidJson { message } => {
                write!(f, "Invalid envelope JSON: {}", message)
            }
            EnvelopeError::MissingType => {
                write!(f, "Envelope is missing the required 'type' field")
            }
            EnvelopeError::DuplicateKey { key } => {
                write!(f, "Duplicate payload key '{}'", key)
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl EnvelopeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            EnvelopeError::InvalidJson { .. } => "envelope_invalid",
            EnvelopeError::MissingType => "missing_type",
            EnvelopeError::DuplicateKey { .. } => "envelope_invalid",
        }
    }
}

impl From<EnvelopeError> for RelayError {
    fn from(err: EnvelopeError) -> Self {
        RelayError::Envelope(err)
    }
}

// =============================================================================
// Store errors
// =============================================================================

/// Errors raised by the message store. Every I/O failure collapses into
/// `Unavailable`; callers only distinguish open-time from query-time
/// failures.
#[derive(Debug)]
pub enum StoreError {
    /// Failed to open or initialize the database.
    Open { path: String, message: String },

    /// A query or write failed.
    Unavailable { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Open { path, message } => {
                write!(f, "Failed to open message store '{}': {}", path, message)
            }
            StoreError::Unavailable { message } => {
                write!(f, "Message store unavailable: {}", message)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable {
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        RelayError::Store(err)
    }
}

// =============================================================================
// Session errors
// =============================================================================

/// Per-session transport failures. These never produce application-level
/// error frames; the peer observes a close.
#[derive(Debug)]
pub enum SessionError {
    /// The send queue exceeded its bound; the session is dropped.
    Overloaded { capacity: usize },

    /// The socket failed mid-write.
    WriteFailed { message: String },

    /// The listen socket could not be bound.
    BindFailed { port: u16, message: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Overloaded { capacity } => {
                write!(f, "Session send queue exceeded {} pending frames", capacity)
            }
            SessionError::WriteFailed { message } => {
                write!(f, "Session write failed: {}", message)
            }
            SessionError::BindFailed { port, message } => {
                write!(f, "Failed to bind port {}: {}", port, message)
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl SessionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::Overloaded { .. } => "session_overloaded",
            SessionError::WriteFailed { .. } => "write_error",
            SessionError::BindFailed { .. } => "port_bind_failed",
        }
    }
}

impl From<SessionError> for RelayError {
    fn from(err: SessionError) -> Self {
        RelayError::Session(err)
    }
}

// =============================================================================
// Request errors (HTTP facade)
// =============================================================================

/// Malformed input on the HTTP facade.
#[derive(Debug)]
pub enum RequestError {
    /// `GET /ws/poll` without a `session_id`.
    MissingSessionId,

    /// `POST /ws/send` body without a `type`.
    MissingType,

    /// Request body is not valid JSON.
    InvalidBody { message: String },

    /// Long-polling is not enabled on this server.
    BridgeNotAttached,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::MissingSessionId => write!(f, "Missing 'session_id' query parameter"),
            RequestError::MissingType => write!(f, "Missing 'type' field"),
            RequestError::InvalidBody { message } => {
                write!(f, "Invalid request body: {}", message)
            }
            RequestError::BridgeNotAttached => {
                write!(f, "Long-polling bridge not attached")
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::MissingSessionId => StatusCode::BAD_REQUEST,
            RequestError::MissingType => StatusCode::BAD_REQUEST,
            RequestError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            RequestError::BridgeNotAttached => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::MissingSessionId => "missing_session_id",
            RequestError::MissingType => "missing_type",
            RequestError::InvalidBody { .. } => "invalid_body",
            RequestError::BridgeNotAttached => "bridge_not_attached",
        }
    }
}

impl From<RequestError> for RelayError {
    fn from(err: RequestError) -> Self {
        RelayError::Request(err)
    }
}

/// A specialized Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
