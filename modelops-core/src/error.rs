//! Error types for the modelops core library.
//!
//! Uses `thiserror` for public API error types. Tracking-server failures are
//! never retried or buffered: every variant here is fatal to the workflow
//! that raised it.

use std::path::PathBuf;

/// Errors from the tracking server (runs, artifacts, and model registry).
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Tracking server unreachable at {uri}: {message}")]
    Connection { uri: String, message: String },

    #[error("Tracking server returned {status} ({error_code}): {message}")]
    Api {
        status: u16,
        error_code: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Tracking response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unsupported artifact location: {0}")]
    UnsupportedArtifactUri(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TrackingError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ResponseParse {
            message: msg.into(),
        }
    }

    /// Whether the server reported that the resource already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Api { error_code, .. } => error_code == "RESOURCE_ALREADY_EXISTS",
            _ => false,
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_detection() {
        assert!(TrackingError::AlreadyExists("m".into()).is_already_exists());
        let api = TrackingError::Api {
            status: 400,
            error_code: "RESOURCE_ALREADY_EXISTS".into(),
            message: "Registered Model (name=m) already exists.".into(),
        };
        assert!(api.is_already_exists());
        assert!(!TrackingError::not_found("m").is_already_exists());
    }

    #[test]
    fn test_error_display() {
        let err = TrackingError::Connection {
            uri: "http://127.0.0.1:5000".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Tracking server unreachable at http://127.0.0.1:5000: connection refused"
        );
    }
}
