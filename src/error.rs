use std::convert::Infallible;
use std::io;

use thiserror::Error;

/// A specialized Result type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type for training, loading and tagging.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed instance data, a bad argument, or an unknown name.
    #[error("{0}")]
    InvalidInput(String),

    /// Corrupt or unsupported model data.
    #[error("invalid model format: {0}")]
    Format(String),

    /// Failure while reading or writing a file.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Numerical failure during optimization.
    #[error("training failed: {0}")]
    Training(String),

    /// The parameter exists but does not apply to the selected algorithm.
    #[error("parameter not applicable to the selected algorithm: {0}")]
    NotFound(String),

    /// Training was stopped through the cancellation flag.
    #[error("training cancelled after {0} iterations")]
    Cancelled(usize),
}

impl Error {
    pub(crate) fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    pub(crate) fn training<S: Into<String>>(msg: S) -> Self {
        Self::Training(msg.into())
    }
}

impl From<Infallible> for Error {
    fn from(err: Infallible) -> Self {
        match err {}
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}
