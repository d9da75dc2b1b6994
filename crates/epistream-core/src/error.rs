//! Error types for the frame and statistics pipelines.

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Filesystem or stream I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A source stream is malformed, truncated or has an unexpected shape.
    #[error("decode error in {source_name} at byte {offset}: {message}")]
    Decode {
        source_name: String,
        offset: u64,
        message: String,
    },

    /// The two keyed streams cannot be aligned (non-numeric or regressing keys).
    #[error("join error: {message}")]
    Join { message: String },

    /// Cache artifact could not be written, published or read.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Statistics store failure.
    #[error("store error: {message}")]
    Store { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The consumer went away or the build was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// A requested run or document does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },
}

impl PipelineError {
    pub(crate) fn decode(
        source_name: impl Into<String>,
        offset: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::Decode {
            source_name: source_name.into(),
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub(crate) fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Cancellation is an expected outcome of a client disconnect, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 1,
            Self::Config { .. } => 1,

            // Bad input data
            Self::Decode { .. } => 3,
            Self::Join { .. } => 3,

            // Local storage
            Self::Io(_) => 4,
            Self::Cache { .. } => 4,
            Self::Store { .. } => 4,

            Self::Cancelled => 130,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode("json", err.column() as u64, err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            return Self::Cancelled;
        }
        Self::Io(std::io::Error::other(err.to_string()))
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_failure_class() {
        assert!(PipelineError::Cancelled.is_cancellation());
        assert!(!PipelineError::cache("rename failed").is_cancellation());
    }

    #[test]
    fn test_exit_codes_group_by_cause() {
        assert_eq!(PipelineError::decode("simdata", 10, "eof").exit_code(), 3);
        assert_eq!(PipelineError::store("locked").exit_code(), 4);
        assert_eq!(
            PipelineError::NotFound {
                what: "run 4".into()
            }
            .exit_code(),
            1
        );
    }
}
