//! Error types for the subscription client.

use crate::types::{Code, Status, StatusClass};
use thiserror::Error;

/// Main error type for client operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("{code}: {message}")]
    Status { code: Code, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Build an error from a non-OK terminal status.
    pub fn from_status(status: &Status) -> Self {
        ClientError::Status {
            code: status.code,
            message: status.details.clone(),
        }
    }

    pub fn status(code: Code, message: impl Into<String>) -> Self {
        ClientError::Status {
            code,
            message: message.into(),
        }
    }

    /// Fallback error for calls that finish with neither a response nor a status.
    pub fn unknown() -> Self {
        Self::status(Code::Unknown, "Unknown error")
    }

    /// Transport code carried by the error. Local failures report `Unknown`.
    pub fn code(&self) -> Code {
        match self {
            ClientError::Status { code, .. } => *code,
            _ => Code::Unknown,
        }
    }

    pub fn class(&self) -> StatusClass {
        self.code().class()
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Code::NotFound
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Status {
            code: status.code,
            message: status.details,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
