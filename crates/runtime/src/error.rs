//! Error types for the board runtime.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Connection-phase failure kinds.
///
/// Every kind is terminal for the attempt that produced it and recoverable
/// by re-running device detection. Kinds render SCREAMING_SNAKE in event
/// payloads (`NO_DEVICES`, `CANT_OPEN_PORT`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionErrorKind {
    NoDevices,
    CantOpenPort,
    ConnectionLost,
    PermissionDenied,
    NotSupported,
    NoDriverFound,
    NoPortFound,
    CantOpenConnection,
    UnexpectedError,
}

impl ConnectionErrorKind {
    /// The wire name of this kind, as carried in events.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionErrorKind::NoDevices => "NO_DEVICES",
            ConnectionErrorKind::CantOpenPort => "CANT_OPEN_PORT",
            ConnectionErrorKind::ConnectionLost => "CONNECTION_LOST",
            ConnectionErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ConnectionErrorKind::NotSupported => "NOT_SUPPORTED",
            ConnectionErrorKind::NoDriverFound => "NO_DRIVER_FOUND",
            ConnectionErrorKind::NoPortFound => "NO_PORT_FOUND",
            ConnectionErrorKind::CantOpenConnection => "CANT_OPEN_CONNECTION",
            ConnectionErrorKind::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the board runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A connection-phase failure (see [`ConnectionErrorKind`]).
    #[error("{kind}: {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
    },

    /// A synchronous exchange is already in flight; the capture buffer
    /// belongs to exactly one exchange at a time.
    #[error("synchronous exchange already in flight")]
    SynchronousBusy,

    /// Operation requires an open connection.
    #[error("no open board connection")]
    NotConnected,

    /// A device id passed by the caller does not match any known device.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Devices are attached but none is approved; the candidates are
    /// carried for the caller to choose from.
    #[error("device approval required ({} candidates)", candidates.len())]
    ApprovalRequired {
        candidates: Vec<crate::usb::UsbDeviceInfo>,
    },

    /// The manager task is gone, or an in-flight exchange was abandoned
    /// when the port closed.
    #[error("channel closed: manager is gone or the exchange was abandoned")]
    ChannelClosed,

    /// Timeout imposed by a caller (the transport itself never times out).
    #[error("timeout: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error from the remembered-product store.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a connection-phase error.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection {
            kind,
            message: message.into(),
        }
    }

    /// Returns the connection-phase kind, if this is one.
    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Error::Connection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
