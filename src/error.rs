//! Error types for the feed data engine.
//!
//! Every failure that crosses the engine boundary is an [`Error`]. Callers that
//! need the uniform `{success: false, message}` shape convert it with
//! [`Failure::from`].

use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::result;

/// A specialized Result type for feed operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for feed operations.
#[derive(Debug)]
pub enum Error {
    /// Feed (or other addressed entity) does not exist
    NotFound(String),
    /// Bad characters, bad time range, bad time format, unit too long
    Validation(String),
    /// Request datapoint cap exceeded
    LimitExceeded(String),
    /// Storage engine reported a failure
    Backend(String),
    /// Engine does not implement the requested capability
    Unsupported(String),
    /// Checksum mismatch or malformed frame
    Integrity(String),
    /// Ownership check failed
    Authorization(String),
    /// Configuration errors
    Config(String),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serialization(String),
}

impl Error {
    /// The bare message, without the category prefix used by `Display`.
    pub fn message(&self) -> String {
        match self {
            Error::NotFound(msg)
            | Error::Validation(msg)
            | Error::LimitExceeded(msg)
            | Error::Backend(msg)
            | Error::Unsupported(msg)
            | Error::Integrity(msg)
            | Error::Authorization(msg)
            | Error::Config(msg)
            | Error::Serialization(msg) => msg.clone(),
            Error::Io(err) => err.to_string(),
        }
    }

    pub fn feed_not_found() -> Self {
        Error::NotFound("Feed does not exist".to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::LimitExceeded(msg) => write!(f, "Limit exceeded: {}", msg),
            Error::Backend(msg) => write!(f, "Backend error: {}", msg),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Error::Integrity(msg) => write!(f, "Integrity error: {}", msg),
            Error::Authorization(msg) => write!(f, "Authorization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Uniform structured failure returned to callers instead of a raised error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub success: bool,
    pub message: String,
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        Failure {
            success: false,
            message: err.message(),
        }
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::from(&err)
    }
}
