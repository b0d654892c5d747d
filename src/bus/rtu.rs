//! Modbus RTU transport over a serial port.
//!
//! Reads 32-bit floats from input registers (function 0x04, two registers,
//! big-endian word and byte order). Framing follows the RTU rules: a 3.5
//! character silent interval before each request, CRC-16 (poly 0xA001)
//! appended little-endian.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{
    ClearBuffer, DataBits, Parity as LineParity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};

use super::transport::{BusTransport, Parity, SerialSettings, TransportError};

/// Read Input Registers.
pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;

/// Registers occupied by one 32-bit float.
pub const FLOAT_REGISTER_COUNT: u16 = 2;

/// Baud rate used when opening the port, before any device is selected.
const DEFAULT_BAUD_RATE: u32 = 9600;

/// Response timeout used before any device is selected.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Bits per character on the wire for the 3.5 character gap (start + 8 + parity + stop).
const BITS_PER_CHAR: f64 = 11.0;

/// Above 19200 baud Modbus RTU uses a fixed 1.75 ms inter-frame gap.
const FIXED_GAP_BAUD: u32 = 19_200;
const FIXED_GAP: Duration = Duration::from_micros(1750);

/// Modbus CRC-16.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build a Read Input Registers request frame.
pub fn encode_read_request(slave: u8, register: u16, count: u16) -> [u8; 8] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let [count_hi, count_lo] = count.to_be_bytes();
    let mut frame = [
        slave,
        FN_READ_INPUT_REGISTERS,
        reg_hi,
        reg_lo,
        count_hi,
        count_lo,
        0,
        0,
    ];
    let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

/// Validate a response frame and return its register payload.
///
/// # Errors
/// `Malformed` for CRC, address, function or length mismatches;
/// `Exception` when the slave answered with an exception frame.
pub fn parse_response(slave: u8, frame: &[u8]) -> Result<&[u8], TransportError> {
    if frame.len() < 5 {
        return Err(TransportError::Malformed(format!(
            "frame too short ({} bytes)",
            frame.len()
        )));
    }

    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let expected = crc16(body);
    if received != expected {
        return Err(TransportError::Malformed(format!(
            "crc mismatch (got {received:#06x}, expected {expected:#06x})"
        )));
    }

    if body[0] != slave {
        return Err(TransportError::Malformed(format!(
            "answer from slave {} while addressing {}",
            body[0], slave
        )));
    }

    let function = body[1];
    if function == FN_READ_INPUT_REGISTERS | 0x80 {
        return Err(TransportError::Exception { code: body[2] });
    }
    if function != FN_READ_INPUT_REGISTERS {
        return Err(TransportError::Malformed(format!(
            "unexpected function code {function:#04x}"
        )));
    }

    let byte_count = usize::from(body[2]);
    let payload = &body[3..];
    if payload.len() != byte_count {
        return Err(TransportError::Malformed(format!(
            "byte count {} does not match payload length {}",
            byte_count,
            payload.len()
        )));
    }
    Ok(payload)
}

/// Decode a big-endian IEEE-754 float from a 4-byte register payload.
pub fn decode_float(payload: &[u8]) -> Result<f32, TransportError> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| {
        TransportError::Malformed(format!(
            "expected 4 payload bytes for a float, got {}",
            payload.len()
        ))
    })?;
    let value = f32::from_be_bytes(bytes);
    if !value.is_finite() {
        return Err(TransportError::Decode(format!(
            "non-finite value from bytes {bytes:02x?}"
        )));
    }
    Ok(value)
}

/// Silent interval required before a request at `baud_rate`.
pub fn frame_gap(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate > FIXED_GAP_BAUD {
        return FIXED_GAP;
    }
    Duration::from_secs_f64(3.5 * BITS_PER_CHAR / f64::from(baud_rate))
}

/// Modbus RTU client on a serial port.
pub struct RtuTransport {
    port: SerialStream,
    path: String,
    slave: u8,
    baud_rate: u32,
    timeout: Duration,
}

impl RtuTransport {
    /// Open the serial device at `path`.
    ///
    /// # Errors
    /// Returns `TransportError::Serial` if the port cannot be opened.
    pub fn open(path: impl Into<String>) -> Result<Self, TransportError> {
        let path = path.into();
        let port = tokio_serial::new(&path, DEFAULT_BAUD_RATE)
            .timeout(DEFAULT_TIMEOUT)
            .open_native_async()
            .map_err(|e| TransportError::Serial(format!("cannot open '{path}': {e}")))?;

        tracing::info!(port = %path, "Serial port opened");
        Ok(Self {
            port,
            path,
            slave: 1,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Serial(e.to_string()))?;
        tokio::time::sleep(frame_gap(self.baud_rate)).await;

        self.port.write_all(request).await?;
        self.port.flush().await?;

        timeout(self.timeout, read_frame(&mut self.port))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}

/// Read one response frame: header, then either an exception or a payload.
async fn read_frame(port: &mut SerialStream) -> Result<Vec<u8>, TransportError> {
    let mut frame = vec![0u8; 3];
    port.read_exact(&mut frame).await?;

    let remaining = if frame[1] & 0x80 != 0 {
        // exception code already read, CRC left
        2
    } else {
        usize::from(frame[2]) + 2
    };

    let start = frame.len();
    frame.resize(start + remaining, 0);
    port.read_exact(&mut frame[start..]).await?;
    Ok(frame)
}

impl std::fmt::Debug for RtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuTransport")
            .field("path", &self.path)
            .field("slave", &self.slave)
            .field("baud_rate", &self.baud_rate)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl BusTransport for RtuTransport {
    fn configure(&mut self, settings: &SerialSettings) -> Result<(), TransportError> {
        let serial = |e: tokio_serial::Error| TransportError::Serial(e.to_string());

        let data_bits = match settings.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(TransportError::Serial(format!(
                    "unsupported data bits: {other}"
                )));
            }
        };
        let stop_bits = match settings.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(TransportError::Serial(format!(
                    "unsupported stop bits: {other}"
                )));
            }
        };
        let parity = match settings.parity {
            Parity::None => LineParity::None,
            Parity::Odd => LineParity::Odd,
            Parity::Even => LineParity::Even,
        };

        self.port.set_baud_rate(settings.baud_rate).map_err(serial)?;
        self.port.set_data_bits(data_bits).map_err(serial)?;
        self.port.set_parity(parity).map_err(serial)?;
        self.port.set_stop_bits(stop_bits).map_err(serial)?;
        self.baud_rate = settings.baud_rate;
        self.timeout = settings.timeout;
        Ok(())
    }

    fn set_slave(&mut self, address: u8) {
        self.slave = address;
    }

    async fn read_float(&mut self, register: u16) -> Result<f32, TransportError> {
        let request = encode_read_request(self.slave, register, FLOAT_REGISTER_COUNT);
        let frame = self.exchange(&request).await?;
        let payload = parse_response(self.slave, &frame)?;
        decode_float(payload)
    }
}
