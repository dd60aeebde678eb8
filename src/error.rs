//! # Error Types
//!
//! Custom error types for SimLink using `thiserror`.
//!
//! Frame and parameter errors are recoverable: the offending frame is logged
//! and dropped while the session loop continues. Transport errors are fatal
//! to the current session and force a disconnect.

use thiserror::Error;

/// Errors produced while validating or slicing a single CRSF frame.
///
/// All variants are non-fatal; the caller discards the frame and keeps
/// reading.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Sync byte is not one of the accepted device addresses
    #[error("unknown sync byte: 0x{0:02X}")]
    BadSync(u8),

    /// Buffer length disagrees with the frame's length byte
    #[error("length mismatch: length byte says {expected} bytes, buffer holds {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Trailing CRC byte disagrees with the computed checksum
    #[error("CRC mismatch: computed 0x{computed:02X}, received 0x{received:02X}")]
    CrcMismatch { computed: u8, received: u8 },

    /// Buffer too short to hold even a minimal frame
    #[error("truncated frame: {0} bytes")]
    Truncated(usize),
}

/// Errors produced by the chunked-parameter reassembly protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// Chunk counter exceeds the buffer allocated at first chunk
    #[error("parameter {index}: chunk counter {chunk} out of range (total {total})")]
    IndexOutOfRange { index: u8, chunk: u8, total: u8 },

    /// Slot for this chunk counter is already filled
    #[error("parameter {index}: duplicate chunk {chunk}")]
    DuplicateChunk { index: u8, chunk: u8 },

    /// Reassembled buffer did not parse as a typed parameter
    #[error("parameter {index}: {reason}")]
    DecodeFailure { index: u8, reason: String },
}

/// Errors from the serial transport. Fatal to the current session: the
/// engine transitions to Disconnected and stops writing until a new
/// transport is supplied.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for SimLink
#[derive(Debug, Error)]
pub enum SimlinkError {
    /// CRSF frame validation errors
    #[error("CRSF frame error: {0}")]
    Frame(#[from] FrameError),

    /// Parameter protocol errors
    #[error("parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Serial transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No serial device found at any candidate path
    #[error("no CRSF device found at: {0}")]
    SerialPortNotFound(String),

    /// Serial port setup errors
    #[error("serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration validation errors
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    /// Telemetry record serialization errors
    #[error("telemetry serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for SimLink
pub type Result<T> = std::result::Result<T, SimlinkError>;
