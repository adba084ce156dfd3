pub mod key_space;

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Set,
}

impl Operation {
    pub fn marker(&self) -> u8 {
        match self {
            Operation::Get => b'g',
            Operation::Set => b's',
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Get => f.write_str("GET"),
            Operation::Set => f.write_str("SET"),
        }
    }
}

/// Why a single operation failed. Everything except `Disconnected` is a
/// status code reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Exists,
    TooBig,
    InvalidArguments,
    NotStored,
    NotMyVbucket,
    AuthFailed,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    Internal,
    Busy,
    TemporaryFailure,
    Disconnected,
    Unknown(u16),
}

const NAMED_KINDS: [(ErrorKind, &str); 14] = [
    (ErrorKind::NotFound, "not-found"),
    (ErrorKind::Exists, "exists"),
    (ErrorKind::TooBig, "too-big"),
    (ErrorKind::InvalidArguments, "invalid-arguments"),
    (ErrorKind::NotStored, "not-stored"),
    (ErrorKind::NotMyVbucket, "not-my-vbucket"),
    (ErrorKind::AuthFailed, "auth-failed"),
    (ErrorKind::UnknownCommand, "unknown-command"),
    (ErrorKind::OutOfMemory, "out-of-memory"),
    (ErrorKind::NotSupported, "not-supported"),
    (ErrorKind::Internal, "internal"),
    (ErrorKind::Busy, "busy"),
    (ErrorKind::TemporaryFailure, "temporary-failure"),
    (ErrorKind::Disconnected, "disconnected"),
];

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let ErrorKind::Unknown(status) = self {
            return write!(f, "status-{:#06x}", status);
        }
        let name = NAMED_KINDS
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown");
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("unknown error kind {0:?}, expected one of: not-found, exists, too-big, invalid-arguments, not-stored, not-my-vbucket, auth-failed, unknown-command, out-of-memory, not-supported, internal, busy, temporary-failure, disconnected")]
pub struct ParseErrorKindError(String);

impl FromStr for ErrorKind {
    type Err = ParseErrorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        NAMED_KINDS
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| ParseErrorKindError(s.to_string()))
    }
}

/// Outcome of one issued request, posted back to the worker that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationResult {
    pub operation: Operation,
    pub error: Option<ErrorKind>,
}

impl OperationResult {
    pub fn ok(operation: Operation) -> Self {
        Self {
            operation,
            error: None,
        }
    }

    pub fn failed(operation: Operation, kind: ErrorKind) -> Self {
        Self {
            operation,
            error: Some(kind),
        }
    }
}
