use std::error::Error;
use std::io;
use thiserror::Error;

/// An error related to storage operations (reads, writes, commits...).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Error from the OS I/O layer.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Error related to data corruption.
    #[error(transparent)]
    Corruption(#[from] CorruptionError),
    /// The fixed-length term key space has no combinations left.
    #[error("term key space exhausted, no more combinations are possible")]
    KeySpaceExhausted,
    /// A byte string of unexpected length was handed to the key allocator.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// The configured key length.
        expected: usize,
        /// The length of the input.
        actual: usize,
    },
    #[doc(hidden)]
    #[error("{0}")]
    Other(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl From<heed::Error> for StorageError {
    #[inline]
    fn from(error: heed::Error) -> Self {
        match error {
            heed::Error::Io(error) => Self::Io(error),
            error => Self::Other(Box::new(error)),
        }
    }
}

impl From<StorageError> for io::Error {
    #[inline]
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Io(error) => error,
            StorageError::Corruption(error) => error.into(),
            error => Self::other(error.to_string()),
        }
    }
}

/// An error returned if some content in the database is corrupted.
#[derive(Debug, Error)]
pub enum CorruptionError {
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Other(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl CorruptionError {
    /// Builds an error from a printable error message.
    #[inline]
    pub(crate) fn msg(msg: impl Into<String>) -> Self {
        Self::Msg(msg.into())
    }
}

impl From<CorruptionError> for io::Error {
    #[inline]
    fn from(error: CorruptionError) -> Self {
        Self::new(io::ErrorKind::InvalidData, error)
    }
}
