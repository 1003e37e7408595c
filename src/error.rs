//! Error types for the eightsetmap storage engine.

use std::fmt;
use std::io;

/// The result type used throughout eightsetmap.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for eightsetmap operations.
///
/// A missing key is never an error: the read surface reports it as `None`.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred.
    Io(io::Error),

    /// The file is structurally invalid: bad magic, an impossible header,
    /// or a record that does not fit its declared bounds.
    Corruption(String),

    /// A shifted directory was requested on a file whose entry table is not
    /// sorted by key. The file must be repacked in exact mode first.
    NotSorted(String),

    /// A feature or function is not implemented for the active mode.
    NotImplemented(String),

    /// An invalid argument was provided.
    InvalidArgument(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not-sorted error.
    pub fn not_sorted(msg: impl Into<String>) -> Self {
        Error::NotSorted(msg.into())
    }

    /// Creates a new not-implemented error.
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Corruption(msg) => write!(f, "Data corruption: {}", msg),
            Error::NotSorted(msg) => write!(f, "Keys not sorted: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("caplen out of bounds");
        assert_eq!(err.to_string(), "Data corruption: caplen out of bounds");

        let err = Error::not_implemented("shifted rewrite");
        assert_eq!(err.to_string(), "Not implemented: shifted rewrite");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
