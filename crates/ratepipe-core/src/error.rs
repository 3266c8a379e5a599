use serde::Serialize;

/// Fixed diagnostic emitted when a worker ignores cancellation past the hard
/// timeout (soft timeout + 1 second). See [`RatePipeError::HardTimeout`].
pub const HARD_TIMEOUT_MESSAGE: &str = "a worker was still sending after timeout + 1 second. This indicates a bug in the worker code. Workers should immediately exit on receiving a cancellation signal.";

#[derive(Debug, thiserror::Error)]
pub enum RatePipeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("{}", HARD_TIMEOUT_MESSAGE)]
    HardTimeout,

    #[error("Resume log error: {0}")]
    Resume(String),
}

impl Serialize for RatePipeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = RatePipeError::Validation("field X is required".to_string());
        assert_eq!(err.to_string(), "Validation error: field X is required");
    }

    #[test]
    fn engine_error_display() {
        let err = RatePipeError::Engine("timeout".to_string());
        assert_eq!(err.to_string(), "Engine error: timeout");
    }

    #[test]
    fn config_error_display() {
        let err = RatePipeError::Config("missing worker-type".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing worker-type");
    }

    #[test]
    fn hard_timeout_message_is_exact() {
        let err = RatePipeError::HardTimeout;
        assert_eq!(err.to_string(), HARD_TIMEOUT_MESSAGE);
    }

    #[test]
    fn io_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RatePipeError = io_err.into();
        let msg = err.to_string();
        assert!(msg.contains("IO error"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn serde_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: RatePipeError = json_err.into();
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn serialize_produces_string() {
        let err = RatePipeError::Validation("test error".to_string());
        let json = serde_json::to_string(&err).expect("serialize should succeed");
        assert_eq!(json, "\"Validation error: test error\"");
    }

    #[test]
    fn error_is_debug() {
        let err = RatePipeError::Validation("test".to_string());
        let debug = format!("{:?}", err);
        assert!(debug.contains("Validation"));
    }
}
