//! Error handling for the Lost & Found client

use crate::validation::FieldErrors;
use lostfound_auth::AuthError;
use lostfound_postgrest::PostgrestError;
use lostfound_realtime::RealtimeError;
use lostfound_storage::StorageError;
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a caller can see, grouped by what the user can do about it
#[derive(Error, Debug)]
pub enum Error {
    /// No session, or the provider no longer accepts it
    #[error("Authentication required: {0}")]
    Auth(String),

    /// Rejected by a row-level policy or an admin-only gate
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Client-side form checks failed; nothing was sent
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    /// Transport failure talking to the backend
    #[error("Network error: {0}")]
    Network(String),

    /// A single row was expected but none came back
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },

    /// Any other provider failure, message passed through as-is
    #[error("{0}")]
    Remote(String),

    /// The owning view closed before the operation finished
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    pub fn forbidden<T: fmt::Display>(msg: T) -> Self {
        Error::Forbidden(msg.to_string())
    }

    pub fn not_found<T: fmt::Display>(msg: T) -> Self {
        Error::NotFound(msg.to_string())
    }

    pub fn remote<T: fmt::Display>(msg: T) -> Self {
        Error::Remote(msg.to_string())
    }

    /// Whether repeating the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Error::Auth(message),
            StatusCode::FORBIDDEN => Error::Forbidden(message),
            StatusCode::NOT_FOUND => Error::NotFound(message),
            s if s.is_server_error() => Error::Network(message),
            _ => Error::Remote(message),
        }
    }
}

impl From<PostgrestError> for Error {
    fn from(err: PostgrestError) -> Self {
        let code = err.code().map(str::to_string);
        let status = err.status();
        // 42501 is Postgres' insufficient_privilege, raised by RLS
        match (code.as_deref(), status) {
            (Some("42501"), _) => Error::Forbidden(err.message()),
            (Some("PGRST116"), _) => Error::NotFound(err.message()),
            (Some("PGRST301"), _) | (Some("PGRST302"), _) => Error::Auth(err.message()),
            (_, Some(status)) => Error::from_status(status, err.message()),
            _ => match err {
                PostgrestError::NetworkError(e) => Error::Network(e.to_string()),
                other => Error::Remote(other.to_string()),
            },
        }
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NetworkError(e) => Error::Network(e.to_string()),
            AuthError::MissingSession => Error::Auth("You are not signed in".to_string()),
            AuthError::InvalidToken(message) => Error::Auth(message),
            AuthError::ApiError { status, message } if status.is_server_error() => {
                Error::Network(message)
            }
            // sign-in failures answer 400; keep the provider wording as-is
            AuthError::ApiError { status, message } if status == StatusCode::UNAUTHORIZED => {
                Error::Auth(message)
            }
            AuthError::ApiError { message, .. } => Error::Remote(message),
            AuthError::SerializationError(e) => Error::Json(e),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ApiError { status, message } => Error::from_status(status, message),
            StorageError::NetworkError(e) => Error::Network(e.to_string()),
            StorageError::SerializationError(e) => Error::Json(e),
            StorageError::UrlParseError(e) => Error::Url(e),
            other => Error::Remote(other.to_string()),
        }
    }
}

impl From<RealtimeError> for Error {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::SubscriptionError(reason) => Error::Forbidden(reason),
            RealtimeError::ConnectionError(message) => Error::Network(message),
            RealtimeError::Timeout(message) => Error::Network(message),
            RealtimeError::WebSocketError(e) => Error::Network(e.to_string()),
            RealtimeError::UrlParseError(e) => Error::Url(e),
            RealtimeError::SerializationError(e) => Error::Json(e),
            RealtimeError::ChannelError(message) => Error::Remote(message),
        }
    }
}
