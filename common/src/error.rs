use displaydoc::Display;

use crate::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error from the core library.
#[derive(Debug, Display)]
pub enum Error {
    /// Invalid {encoding} encoding: {detail}
    MalformedEncoding {
        encoding: &'static str,
        detail: String,
    },

    /// Malformed {usage} "{input}": {detail}
    MalformedKey {
        usage: &'static str,
        input: String,
        detail: String,
    },

    /// Invalid data format: {source_line}
    InvalidDataFormat { source_line: String },

    /// Unsupported hash type "{0}"
    UnsupportedHash(String),

    /// Signature error: {0}
    SigningError(ed25519_compact::Error),

    /// Signing policy references keys that are not loaded: {names}
    PolicyUnknownKeys { names: String },

    /// Storage error: {0}
    Storage(StorageError),

    /// Operation cancelled
    Cancelled,
}

impl std::error::Error for Error {}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl Error {
    pub(crate) fn invalid_data(source_line: impl Into<String>) -> Self {
        Self::InvalidDataFormat {
            source_line: source_line.into(),
        }
    }
}
