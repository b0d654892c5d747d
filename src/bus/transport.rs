//! Bus transport abstraction and fault classification.

use std::str::FromStr;
use std::time::Duration;

use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::config::BusParams;

/// Modbus exception: acknowledge (request accepted, still processing).
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Modbus exception: slave device busy.
pub const EXCEPTION_SLAVE_BUSY: u8 = 0x06;

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Unsupported parity value in a meter entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported parity '{value}' (expected none, odd or even)")]
pub struct ParityConfigError {
    pub value: String,
}

impl Parity {
    /// Parse a configured parity string (case-insensitive).
    pub fn parse(value: &str) -> Result<Self, ParityConfigError> {
        Self::from_str(value.trim()).map_err(|_| ParityConfigError {
            value: value.to_string(),
        })
    }
}

/// Line settings applied to the transport before a device's turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub timeout: Duration,
}

impl SerialSettings {
    /// Build settings from a meter's configured line parameters.
    ///
    /// # Errors
    /// Returns `ParityConfigError` if the parity string is not supported.
    pub fn from_params(params: &BusParams) -> Result<Self, ParityConfigError> {
        Ok(Self {
            baud_rate: params.baudrate,
            data_bits: params.bytesize,
            parity: Parity::parse(&params.parity)?,
            stop_bits: params.stopbits,
            timeout: params.timeout(),
        })
    }
}

/// Errors raised by a bus transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Low-level serial I/O error.
    #[error("serial i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// No (complete) answer within the response timeout.
    #[error("no answer from slave within {0:?}")]
    Timeout(Duration),

    /// Response frame failed CRC, address, function or length checks.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Register payload could not be decoded into a value.
    #[error("cannot decode register value: {0}")]
    Decode(String),

    /// Slave answered with a Modbus exception.
    #[error("slave reported exception {code:#04x}")]
    Exception { code: u8 },

    /// Port could not be opened or reconfigured.
    #[error("serial port error: {0}")]
    Serial(String),
}

/// Class of a retryable read fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TransientKind {
    /// Corrupt or unexpected response frame.
    MalformedValue,
    /// Payload not decodable as the requested type.
    Decode,
    /// I/O failure or silence on the line.
    Io,
}

impl TransportError {
    /// Transient class of this error, or `None` if retrying cannot help.
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            Self::Io(_) | Self::Timeout(_) => Some(TransientKind::Io),
            Self::Malformed(_) => Some(TransientKind::MalformedValue),
            Self::Decode(_) => Some(TransientKind::Decode),
            Self::Exception { code } => {
                matches!(*code, EXCEPTION_ACKNOWLEDGE | EXCEPTION_SLAVE_BUSY)
                    .then_some(TransientKind::Io)
            }
            Self::Serial(_) => None,
        }
    }
}

/// Classified result of one register read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Value read successfully.
    Value(f32),
    /// Retryable fault.
    Transient(TransientKind, TransportError),
    /// Fault that retrying will not fix.
    Fatal(TransportError),
}

impl From<Result<f32, TransportError>> for ReadOutcome {
    fn from(result: Result<f32, TransportError>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(e) => match e.transient_kind() {
                Some(kind) => Self::Transient(kind, e),
                None => Self::Fatal(e),
            },
        }
    }
}

/// A shared serial bus, reconfigured for each device in turn.
///
/// Implementations are owned exclusively by one reader; calls are never
/// concurrent.
#[async_trait::async_trait]
pub trait BusTransport: Send + 'static {
    /// Apply line settings for the next device.
    fn configure(&mut self, settings: &SerialSettings) -> Result<(), TransportError>;

    /// Set the slave address targeted by subsequent reads.
    fn set_slave(&mut self, address: u8);

    /// Read a 32-bit float stored in two consecutive input registers.
    async fn read_float(&mut self, register: u16) -> Result<f32, TransportError>;
}
