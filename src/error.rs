//! Error types for the transport and REPL protocol layers.

use thiserror::Error;

/// Faults reported by the byte-stream reader.
///
/// Framing, parity and overrun faults are handled inside the reader itself
/// (the read loop restarts); only the terminal variants below escape to the
/// controller.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The device disappeared (unplugged, port revoked). The connection
    /// must be torn down and reopened.
    #[error("serial device has been lost")]
    DeviceLost,

    /// A break condition was detected on the line. Not auto-recovered;
    /// the session has to be reopened.
    #[error("break condition detected on serial line")]
    Break,

    /// Any other I/O failure on the underlying stream.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the device controller.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No port matched the board's USB vendor/product filters.
    #[error("no matching device found for board '{board}'")]
    NoDevice { board: &'static str },

    /// Serial port enumeration itself failed.
    #[error("failed to enumerate serial ports: {0}")]
    Enumeration(#[from] serialport::Error),

    /// The port exists but could not be opened (typically already claimed).
    #[error("failed to open serial port {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// An operation that needs a live connection was called while closed.
    #[error("not connected")]
    NotConnected,

    /// A `get` was issued while a previous response is still pending and
    /// the busy guard is enabled.
    #[error("a board response is already pending")]
    Busy,

    /// The connection was reset while a caller was awaiting a response.
    #[error("connection reset while awaiting board response")]
    ResetWhileWaiting,

    /// The connection dropped while a caller was awaiting a response.
    #[error("connection lost while awaiting board response")]
    ConnectionLost,

    /// `wait_board_response` was called but no reply has ever arrived.
    #[error("no board response available")]
    NoResponse,
}

/// A response marker line that violated the wire contract.
///
/// Reported distinctly rather than swallowed: it means the firmware and the
/// host disagree about the reply format.
#[derive(Debug, Error)]
#[error("malformed response line {line:?}: {source}")]
pub struct MalformedResponse {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}
