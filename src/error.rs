//! Error types for port registry operations.

use thiserror::Error;

/// Main error type for port registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No allocation record exists for the named service
    #[error("service '{0}' is not registered")]
    NotFound(String),

    /// Preferred port is held by a registered service or a live unmanaged process.
    /// `owner` is `None` when the holder is outside the registry.
    #[error("{}", conflict_message(.port, .owner))]
    Conflict { port: u16, owner: Option<String> },

    /// Persisted state could not be read, parsed, or written
    #[error("storage error at '{0}': {1}")]
    Storage(String, String),

    /// Request is missing required fields or could not be parsed
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// No free port between the search start and the configured ceiling
    #[error("no free port in range {from}..={ceiling}")]
    Exhausted { from: u32, ceiling: u16 },

    /// Configuration rejected at startup
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Registry could not be reached (connection refused, timeout)
    #[error("registry unreachable at {0}: {1}")]
    Unreachable(String, String),

    /// Registry answered with an error status
    #[error("registry rejected request ({0}): {1}")]
    Rejected(u16, String),
}

fn conflict_message(port: &u16, owner: &Option<String>) -> String {
    match owner {
        Some(owner) => format!("port :{} is already in use by '{}'", port, owner),
        None => format!(
            "port :{} is held by an external process outside the registry",
            port
        ),
    }
}

impl RegistryError {
    /// Stable machine-readable kind, reported alongside the message in HTTP error bodies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Storage(..) => "storage_error",
            Self::MalformedRequest(_) => "malformed_request",
            Self::Exhausted { .. } => "exhausted",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Unreachable(..) => "unreachable",
            Self::Rejected(..) => "rejected",
        }
    }
}

/// Result type alias for port registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
