//! Error types for reader discovery and the live serial link.

use thiserror::Error;

/// Result type alias for reader operations.
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Errors that can occur while locating or talking to the reader.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Serial port error from the serialport crate.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The port could not be opened.
    #[error("Failed to open port '{port}': {reason}")]
    PortOpenFailed { port: String, reason: String },

    /// Serial port is busy (in use by another process).
    #[error("Port '{port}' is busy or in use by another application")]
    PortBusy { port: String },

    /// Permission denied accessing serial port.
    #[error("Permission denied for port '{port}'")]
    PortPermissionDenied { port: String },

    /// Writing the healthcheck failed.
    #[error("Failed to write to port '{port}': {reason}")]
    WriteFailed { port: String, reason: String },

    /// No status reply arrived within the listen window.
    #[error("No healthcheck reply from '{port}' within {window_ms}ms")]
    HandshakeTimeout { port: String, window_ms: u64 },

    /// Lines arrived but none of them announced an online reader.
    #[error("Port '{port}' answered with {ignored_lines} non-qualifying line(s)")]
    HandshakeMalformed { port: String, ignored_lines: usize },

    /// No card was presented within the caller's timeout.
    #[error("No UID received within {timeout_ms}ms")]
    ReadTimeout { timeout_ms: u64 },

    /// The established connection failed at the I/O level.
    #[error("Connection to '{port}' lost: {reason}")]
    IoDisconnect { port: String, reason: String },

    /// The single reopen attempt after a disconnect failed.
    #[error("Reconnect to '{port}' failed: {reason}")]
    ReconnectFailed { port: String, reason: String },

    /// There is no live connection.
    #[error("Reader is not connected")]
    NotConnected,

    /// Discovery probed every candidate without finding the reader.
    #[error("No RFID reader found ({probed} port(s) probed)")]
    NoReaderFound { probed: usize },

    /// Settings could not be read or written.
    #[error("Settings error: {reason}")]
    Settings { reason: String },
}

impl ReaderError {
    /// Check whether this error means the device or port went away, as
    /// opposed to a timeout or a decode problem.
    pub fn is_device_loss(&self) -> bool {
        match self {
            ReaderError::IoDisconnect { .. } => true,
            ReaderError::Serial(e) => matches!(e.kind(), serialport::ErrorKind::NoDevice),
            ReaderError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }

    /// Check if this error is an expected "nothing arrived in time" outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ReaderError::ReadTimeout { .. }
                | ReaderError::HandshakeTimeout { .. }
                | ReaderError::HandshakeMalformed { .. }
        )
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            ReaderError::Serial(_) => "RDR-001",
            ReaderError::Io(_) => "RDR-002",
            ReaderError::Json(_) => "RDR-003",
            ReaderError::PortOpenFailed { .. } => "RDR-010",
            ReaderError::PortBusy { .. } => "RDR-011",
            ReaderError::PortPermissionDenied { .. } => "RDR-012",
            ReaderError::WriteFailed { .. } => "RDR-013",
            ReaderError::HandshakeTimeout { .. } => "RDR-020",
            ReaderError::HandshakeMalformed { .. } => "RDR-021",
            ReaderError::ReadTimeout { .. } => "RDR-030",
            ReaderError::IoDisconnect { .. } => "RDR-040",
            ReaderError::ReconnectFailed { .. } => "RDR-041",
            ReaderError::NotConnected => "RDR-042",
            ReaderError::NoReaderFound { .. } => "RDR-050",
            ReaderError::Settings { .. } => "RDR-060",
        }
    }
}
