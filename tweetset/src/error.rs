//! Error types for the tweetset library.
use thiserror::Error;

/// The primary error type for operations within this library.
#[derive(Error, Debug)]
pub enum TweetsetError {
    /// Bad construction parameters: missing archive file, unknown dataset,
    /// unreadable metadata record. Fatal at construction time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two accumulated predicates constrain the same leaf path to different
    /// required values. Only detectable once all filters are merged, so this
    /// surfaces at evaluation time rather than at filter accumulation.
    #[error("Conflicting predicate at '{path}': {left} vs {right}")]
    ConflictingPredicate {
        path: String,
        left: String,
        right: String,
    },

    /// The requested operation is not available on this backend (e.g. `sort`
    /// against a flat archive file).
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Strict dotted-path resolution failed. The lenient accessors never
    /// produce this; see [`crate::Record::try_field`].
    #[error("Field '{0}' not found in record")]
    FieldNotFound(String),

    /// A record's `timestamp` field could not be interpreted.
    #[error("Invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// A windowed aggregation was requested on a collection that lacks the
    /// time bounds needed to derive windows.
    #[error("Cannot group by time window: {0}")]
    WindowingPrecondition(String),

    /// A raw pattern handed to `matching_regex` did not compile.
    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    /// I/O failure reading or writing an archive file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialized record in an archive file could not be decoded.
    #[error("Record decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A record could not be encoded into the archive format.
    #[error("Record encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// JSON serialization failed during export.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization failed during export.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Wraps an underlying error from the backing document store.
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// A convenience type alias for `Result<T, TweetsetError>`.
pub type Result<T, E = TweetsetError> = std::result::Result<T, E>;
