use thiserror::Error;

/// Unified error type for the Nox tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("fetch failed after {attempts} attempts: {reason}")]
    FetchExhausted { attempts: u32, reason: String },

    #[error("resource unavailable: {0}")]
    Unavailable(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("coordinator stopped: {0}")]
    CoordinatorGone(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        TrackerError::IoError(e.to_string())
    }
}

impl From<toml::de::Error> for TrackerError {
    fn from(e: toml::de::Error) -> Self {
        TrackerError::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = TrackerError::FetchExhausted {
            attempts: 4,
            reason: "connection refused".into(),
        };
        assert!(e.to_string().contains("4 attempts"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TrackerError = io_err.into();
        assert!(matches!(err, TrackerError::IoError(_)));
    }
}
