//! Error types for doc-store operations.

use redis::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, rejected before any store I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connectivity or protocol-level store failure; eligible for retry.
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// Any other store-reported failure. Never retried.
    #[error("store error: {0}")]
    NonTransient(String),

    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether a retry policy may re-run the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        let transient = err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || matches!(
                err.kind(),
                ErrorKind::TryAgain
                    | ErrorKind::BusyLoadingError
                    | ErrorKind::ClusterDown
                    | ErrorKind::MasterDown
                    | ErrorKind::ReadOnly
            );

        if transient {
            Error::Transient(err.to_string())
        } else {
            Error::NonTransient(err.to_string())
        }
    }
}
