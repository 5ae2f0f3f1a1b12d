// lib.rs

mod core;
mod modbus_rtu;
mod client;
mod models;
pub mod registers;
pub mod transport;

pub use crate::core::{ByteLane, DecodeError, DecodedBlock, FieldKind, FieldValue, RegisterBlock, RegisterField, Scale, decode};
pub use modbus_rtu::{
    BROADCAST_ADDRESS, CLEAR_HISTORY, EXCEPTION_FLAG, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS,
    WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_REGISTER, build_clear_history, build_read_request,
    build_write_multiple_registers, build_write_single_register, checksum, crc16, expected_response_len,
    parse_response, parse_write_response,
};
pub use client::{ClientBuilder, ClientConfig, ConnectionState, RenogyClient, ScanResult, scan, scan_serial};
pub use models::{
    BatteryData, BatteryStatus, ControllerData, DailyStats, DcDcStatus, DeviceInfo, HistoricalStats,
    InverterStatus, LoadData, Reading, SolarData,
};
pub use transport::{LoopbackTransport, Reply, SerialSettings, SerialTransport, Transport};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures while validating an RTU response frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Unexpected frame length: expected {expected}, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("CRC mismatch: expected {expected:#06x}, received {received:#06x}")]
    CrcMismatch { expected: u16, received: u16 },

    #[error("Device address mismatch: expected {expected}, received {received}")]
    AddressMismatch { expected: u8, received: u8 },

    #[error("Unexpected function code: expected {expected:#x}, got {received:#x}")]
    UnexpectedFunctionCode { expected: u8, received: u8 },

    #[error("Byte count mismatch: declared {declared}, got {actual}")]
    ByteCountMismatch { declared: usize, actual: usize },

    #[error("Write echo mismatch: sent {sent:04x?}, echoed {echoed:04x?}")]
    EchoMismatch { sent: (u16, u16), echoed: (u16, u16) },

    #[error("Cannot write {0} registers in one request")]
    RegisterCount(usize),

    #[error("Modbus exception: function code {function:#x}, exception code {code:#04x}")]
    Exception { function: u8, code: u8 },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Serial port is not set")]
    PortMissing,

    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    #[error("Attempt count must be at least 1, got {0}")]
    InvalidAttempts(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot open port {port}: {reason}")]
    DeviceNotFound { port: String, reason: String },

    #[error("Timed out waiting for {expected} bytes, received {received}")]
    Timeout { expected: usize, received: usize },

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Not connected to device")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient failures on the half-duplex link; the same request is
    /// sent again.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Frame(FrameError::Exception { .. } | FrameError::RegisterCount(_)) => false,
            Error::Frame(_) => true,
            Error::DeviceNotFound { .. }
            | Error::Decode(_)
            | Error::Config(_)
            | Error::NotConnected
            | Error::Io(_) => false,
        }
    }

    /// Failures that invalidate the open port.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::DeviceNotFound { .. } | Error::Io(_) => true,
            Error::Timeout { .. }
            | Error::Frame(_)
            | Error::Decode(_)
            | Error::Config(_)
            | Error::NotConnected => false,
        }
    }

    /// Device exception code, when the device rejected the request.
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            Error::Frame(FrameError::Exception { code, .. }) => Some(*code),
            _ => None,
        }
    }
}
