// Re-export dependencies used in public interfaces of common types

use thiserror::Error;

pub use chrono;
pub use serde::{Deserialize, Serialize};

mod endpoint;
mod model;
mod timestamp;

pub use endpoint::{EndpointConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use model::*;

#[derive(Error, Debug)]
pub enum QnxtainerError {
    /// The server could not be reached (DNS, connect, timeout, truncated body).
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response. `message` is the server's `error` field when it sent one.
    #[error("{message}")]
    Remote { status: u16, message: String },

    /// A 2xx response whose body is not the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration Error: {0}")]
    InvalidConfig(String),

    #[error("Sync engine is not running")]
    NotRunning,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl QnxtainerError {
    /// True for outcomes produced by talking to the server. Only these feed the
    /// connection monitor.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Remote { .. } | Self::Protocol(_)
        )
    }

    /// Remote and protocol failures look the same to an operator.
    pub fn is_remote_like(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Protocol(_))
    }

    /// Short, stable name of the error class for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Remote { .. } => "remote",
            Self::Protocol(_) => "protocol",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidConfig(_) => "invalid_config",
            Self::NotRunning => "not_running",
            Self::Io(_) => "io",
        }
    }

    /// HTTP status for `Remote` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Define the primary Result type for QNXtainer operations
pub type Result<T> = std::result::Result<T, QnxtainerError>;
