//! Error surface for the public cache API.

use thiserror::Error;

/// Errors returned by [`crate::Cache`] operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `Get` found the key in neither segment.
    #[error("key not found")]
    KeyNotFound,

    /// `Set` failed even after a rotation attempt: the value does not fit
    /// in a single (freshly reset) segment.
    #[error("failed to set key {key:?}: value too large for a segment")]
    SetFailed {
        /// The key that could not be stored.
        key: String,
    },

    /// Arena file open/resize/map failure, surfaced only from construction
    /// and `close`.
    #[error("arena I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An invalid `Config` combination, detected at construction time.
    #[error("invalid config: {0}")]
    Config(String),
}
