use std::sync::Arc;

/// Result type for storage and configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by storage and configuration operations.
///
/// Presentation failures are never surfaced as `Error`. They are reported as terminal
/// [`PaywallState`](crate::PaywallState)s carrying a [`PresentationError`](crate::PresentationError).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Configuration payload could not be parsed.
    #[error("error parsing configuration")]
    ConfigurationParseError(#[source] Arc<serde_json::Error>),

    /// A stored value could not be (de)serialized.
    #[error("error serializing stored value for key {key:?}")]
    Serialization {
        /// Storage key of the offending value.
        key: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// A background storage write panicked or was aborted before completing.
    #[error("storage write task did not complete")]
    StoreTaskFailed,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}
