//! Serial bus layer.
//!
//! - [`BusTransport`]: reconfigurable read-register capability shared by all
//!   meters on one RS-485 line
//! - [`RtuTransport`]: Modbus RTU implementation on a serial port
//! - [`FakeBus`]: scripted in-memory bus
//! - [`ReadOutcome`]: classification of a read into value, transient or
//!   fatal fault

pub mod fake;
pub mod rtu;
mod transport;

pub use fake::{FakeBus, ScriptedRead};
pub use rtu::RtuTransport;
pub use transport::{
    BusTransport, EXCEPTION_ACKNOWLEDGE, EXCEPTION_SLAVE_BUSY, Parity, ParityConfigError,
    ReadOutcome, SerialSettings, TransientKind, TransportError,
};
