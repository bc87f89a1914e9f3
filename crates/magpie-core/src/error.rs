use thiserror::Error;

/// Application-wide error types for the Magpie harvester.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Remote endpoint answered with a non-success status code.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Network/connection error (refused, reset, DNS).
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Backoff retry ceiling reached; carries the last underlying error.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<HarvestError>,
    },

    /// Payload did not have the expected shape (wrong node type,
    /// missing field). Stages treat this as "skip", not "fail".
    #[error("Unexpected payload: {0}")]
    Payload(String),

    /// An all-or-nothing body batch had at least one failure; nothing
    /// from the batch was persisted.
    #[error("Content batch aborted: {failed} of {total} body fetches failed")]
    BatchAborted { failed: usize, total: usize },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Checkpoint document could not be read or written.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    /// Returns true if this error is transient and worth retrying with
    /// backoff. Semantic failures (`Payload`) and exhausted retries are
    /// final for the current attempt chain.
    pub fn is_transient(&self) -> bool {
        match self {
            HarvestError::Network(_) | HarvestError::Timeout(_) => true,
            HarvestError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(HarvestError::Network("reset".into()).is_transient());
        assert!(HarvestError::Timeout(30).is_transient());
        assert!(
            HarvestError::Status {
                status: 503,
                url: "https://api.test/x".into(),
            }
            .is_transient()
        );
        assert!(
            HarvestError::Status {
                status: 429,
                url: "https://api.test/x".into(),
            }
            .is_transient()
        );
    }

    #[test]
    fn terminal_errors() {
        assert!(
            !HarvestError::Status {
                status: 404,
                url: "https://api.test/x".into(),
            }
            .is_transient()
        );
        assert!(!HarvestError::Payload("not an author".into()).is_transient());
        assert!(!HarvestError::Database("disk full".into()).is_transient());
        assert!(
            !HarvestError::RetryExhausted {
                attempts: 5,
                source: Box::new(HarvestError::Timeout(10)),
            }
            .is_transient()
        );
    }

    #[test]
    fn retry_exhausted_keeps_the_last_error() {
        let err = HarvestError::RetryExhausted {
            attempts: 5,
            source: Box::new(HarvestError::Network("connection refused".into())),
        };
        assert!(err.to_string().contains("5 attempts"));
        assert!(err.to_string().contains("connection refused"));
    }
}
