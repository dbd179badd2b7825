//! Error types for the metasync engine.
//!
//! Most failures in this crate are recovered locally (fallback snapshots,
//! skipped bonuses, logged warnings). The variants below cover the cases that
//! do surface to a caller: transport problems reported by a `SnapshotSource`,
//! rejected merges, and configuration or state-file loading.

use thiserror::Error;

/// Result type for metasync operations.
pub type Result<T> = std::result::Result<T, MetaError>;

/// Errors raised by metasync components.
#[derive(Error, Debug)]
pub enum MetaError {
    /// The metrics endpoint could not be reached.
    #[error("Transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The metrics endpoint answered with a non-success status.
    #[error("Endpoint {endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },

    /// A payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A partial update was not a mapping.
    #[error("Invalid partial update: {0}")]
    InvalidPartial(String),

    /// A merge produced a tree that no longer matches the meta-state schema.
    #[error("Merged state does not match the meta-state schema: {0}")]
    Schema(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Filesystem errors while reading persisted state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetaError {
    /// Builds a transport error for the given endpoint.
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MetaError::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error belongs to the transport class handled by the fallback path.
    pub fn is_transport(&self) -> bool {
        matches!(self, MetaError::Transport { .. } | MetaError::Status { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        let err = MetaError::transport("http://localhost:3000", "connection refused");
        assert!(err.is_transport());
        assert!(err.to_string().contains("connection refused"));

        let status = MetaError::Status {
            endpoint: "http://localhost:3000".into(),
            status: 503,
        };
        assert!(status.is_transport());

        let partial = MetaError::InvalidPartial("expected object".into());
        assert!(!partial.is_transport());
    }

    #[test]
    fn json_errors_convert_to_decode() {
        let json_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: MetaError = json_err.into();
        assert!(matches!(err, MetaError::Decode(_)));
    }
}
