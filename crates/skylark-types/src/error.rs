use thiserror::Error;

/// Errors from repository operations (used by trait definitions in skylark-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised by the social-network transport (HTTP actions and streaming).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited by remote: {0}")]
    RateLimited(String),

    #[error("action rejected by remote ({endpoint}, status {status}): {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Connection drops, timeouts and remote throttling are worth retrying.
    /// Rejections and malformed frames are not; authentication failures are fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::RateLimited(_) | Self::Closed
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Errors from the plugin runtime.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' not found")]
    NotFound(String),

    #[error("plugin '{name}' failed to initialize: {message}")]
    Init { name: String, message: String },

    #[error("plugin '{name}' hook failed: {message}")]
    Hook { name: String, message: String },

    #[error("plugin '{name}' hook timed out after {secs}s")]
    Timeout { name: String, secs: u64 },

    #[error("plugin '{name}' panicked")]
    Panicked { name: String },

    #[error("invalid plugin manifest for '{name}': {message}")]
    Manifest { name: String, message: String },

    #[error("plugin storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(TransportError::Timeout(60).is_retryable());
        assert!(TransportError::Connection("reset".into()).is_retryable());
        assert!(!TransportError::Authentication("bad token".into()).is_retryable());
        assert!(TransportError::Authentication("bad token".into()).is_fatal());
        let rejected = TransportError::Rejected {
            endpoint: "notes/create".into(),
            status: 400,
            message: "TOO_LONG".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(!rejected.is_fatal());
        assert!(rejected.to_string().contains("notes/create"));
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError::Timeout {
            name: "radar".to_string(),
            secs: 60,
        };
        assert_eq!(err.to_string(), "plugin 'radar' hook timed out after 60s");
    }
}
