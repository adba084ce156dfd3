use key_value::ErrorKind;
use thiserror::Error;

use crate::protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out connecting to {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed during handshake")]
    HandshakeClosed,

    #[error("Authentication as {username:?} rejected: {kind}")]
    Authentication { username: String, kind: ErrorKind },

    #[error("Bucket {bucket:?} could not be selected: {kind}")]
    BucketSelection { bucket: String, kind: ErrorKind },
}
