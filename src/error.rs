use crate::domain::models::ConnectionStatus;
use thiserror::Error;
use uuid::Uuid;

/// Reasons a notification or read payload could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame tag: {tag}")]
    UnknownTag { tag: u8 },

    #[error("truncated {kind} frame: expected at least {expected} bytes, got {actual}")]
    Truncated {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid value {value} for field {field}")]
    InvalidField { field: &'static str, value: u8 },
}

/// Failures reported by a transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no bluetooth adapter available")]
    Unavailable,

    #[error("request rejected by the stack: {0}")]
    Rejected(String),

    #[error("characteristic {0} not found")]
    MissingCharacteristic(Uuid),

    #[error("transport i/o error: {0}")]
    Io(String),
}

/// Errors surfaced by a device session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("transport unavailable")]
    TransportUnavailable,

    #[error("scan timed out without a matching device")]
    ScanTimeout,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("service discovery failed: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] DecodeError),

    #[error("too many resend requests: {count} (max 30)")]
    TooManyRequests { count: usize },

    #[error("empty resend request")]
    EmptyRequest,

    #[error("not connected (status: {status:?})")]
    NotConnected { status: ConnectionStatus },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("session closed")]
    SessionClosed,
}
