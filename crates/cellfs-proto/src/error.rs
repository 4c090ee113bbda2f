//! Wire-level errors.

use cellfs_kernel::VfsError;
use std::time::Duration;
use thiserror::Error;

/// Failures of the transport itself, as opposed to remote filesystem errors
/// which travel inside responses as a [`Status`](crate::Status).
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] postcard::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] postcard::Error),

    /// Peer closed the stream while a response was expected.
    #[error("connection closed by peer")]
    Closed,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// A well-formed message that is not valid at this point of the exchange.
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

impl ProtoError {
    pub fn unexpected(msg: impl Into<String>) -> Self {
        ProtoError::Unexpected(msg.into())
    }
}

impl From<ProtoError> for VfsError {
    fn from(e: ProtoError) -> Self {
        VfsError::protocol(e.to_string())
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;
