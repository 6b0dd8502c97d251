//! Error types and result aliases for ovid.
//!
//! The variants below are the kinds the workload branches on: storage
//! classification (`NotFound`, `NoSuchKey`, `Conflict`), the terminal
//! validation failures (`ObjectLost`, `UnexpectedObject`, `DataCorruption`,
//! `Truncated`), and the infrastructure kinds everything else collapses
//! into.

/// The result type used throughout ovid.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ovid operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input was provided (sizes, ratios, follower lists, caps).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The bucket does not exist.
    #[error("bucket not found: {bucket}")]
    NotFound {
        /// The bucket that was looked up.
        bucket: String,
    },

    /// The object key does not exist.
    #[error("no such key: {bucket}/{key}")]
    NoSuchKey {
        /// The bucket that was queried.
        bucket: String,
        /// The key that was looked up.
        key: String,
    },

    /// The bucket already exists (creation raced with another process).
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// An object the model expects to exist was not found remotely.
    #[error("object lost: {message}")]
    ObjectLost {
        /// Description including the affected key.
        message: String,
    },

    /// An object the model expects to be absent was found remotely.
    #[error("unexpected object: {message}")]
    UnexpectedObject {
        /// Description including the affected key.
        message: String,
    },

    /// Object bytes diverged from the expected self-describing pattern.
    ///
    /// The report lists every mismatched field of the offending data unit
    /// followed by a hex dump and a legend of the byte layout.
    #[error("data corruption detected\n{report}")]
    DataCorruption {
        /// Human-readable mismatch report with hex dump.
        report: String,
    },

    /// The object body ended before the expected number of bytes.
    #[error("truncated object: expected {expected} bytes in unit, read {actual}\n{dump}")]
    Truncated {
        /// Bytes expected in the data unit.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
        /// Hex dump of the partial unit.
        dump: String,
    },

    /// The workload context was cancelled.
    #[error("workload cancel requested")]
    Cancelled,

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// Any other storage or network failure.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new transport error with the given message.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new transport error with a source cause.
    #[must_use]
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is the missing-key storage classification.
    #[must_use]
    pub fn is_no_such_key(&self) -> bool {
        matches!(self, Self::NoSuchKey { .. })
    }

    /// Returns true if this is the missing-bucket storage classification.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is the bucket-exists storage classification.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if this is a payload validation failure
    /// (corruption or truncation).
    #[must_use]
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::DataCorruption { .. } | Self::Truncated { .. })
    }
}
