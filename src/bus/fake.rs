//! Scripted in-memory bus used in tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::transport::{BusTransport, SerialSettings, TransportError};

/// One scripted answer to a register read.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedRead {
    /// Successful read.
    Value(f32),
    /// Response timed out.
    Timeout,
    /// Corrupt frame.
    Malformed,
    /// Undecodable payload.
    Decode,
    /// Low-level I/O error.
    Io,
    /// Modbus exception from the slave.
    Exception(u8),
    /// Port failure.
    PortFailure,
}

impl ScriptedRead {
    fn into_result(self, timeout: Duration) -> Result<f32, TransportError> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Timeout => Err(TransportError::Timeout(timeout)),
            Self::Malformed => Err(TransportError::Malformed("scripted crc mismatch".into())),
            Self::Decode => Err(TransportError::Decode("scripted non-finite value".into())),
            Self::Io => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted i/o error",
            ))),
            Self::Exception(code) => Err(TransportError::Exception { code }),
            Self::PortFailure => Err(TransportError::Serial("scripted port failure".into())),
        }
    }
}

/// In-memory bus answering reads from a per-(slave, register) script.
///
/// Scripted answers are consumed in order; once a queue is empty the last
/// answer keeps repeating. Registers without any script time out.
#[derive(Debug, Default)]
pub struct FakeBus {
    script: HashMap<(u8, u16), VecDeque<ScriptedRead>>,
    settings: Option<SerialSettings>,
    slave: u8,
    configured: Vec<(u8, SerialSettings)>,
    reads: Vec<(u8, u16)>,
    fail_configure: bool,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for `register` on `slave`.
    pub fn script(
        mut self,
        slave: u8,
        register: u16,
        answers: impl IntoIterator<Item = ScriptedRead>,
    ) -> Self {
        self.script
            .entry((slave, register))
            .or_default()
            .extend(answers);
        self
    }

    /// Always answer `value` for `register` on `slave`.
    pub fn with_value(self, slave: u8, register: u16, value: f32) -> Self {
        self.script(slave, register, [ScriptedRead::Value(value)])
    }

    /// Make every `configure` call fail.
    pub fn with_configure_failure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Every `(slave, settings)` pair applied, in order.
    ///
    /// The slave is the one selected *after* the settings were applied.
    pub fn configured(&self) -> &[(u8, SerialSettings)] {
        &self.configured
    }

    /// Every `(slave, register)` read attempted, in order.
    pub fn reads(&self) -> &[(u8, u16)] {
        &self.reads
    }

    /// Number of read attempts against one register.
    pub fn read_count(&self, slave: u8, register: u16) -> usize {
        self.reads
            .iter()
            .filter(|&&read| read == (slave, register))
            .count()
    }

    fn next_answer(&mut self, register: u16) -> ScriptedRead {
        match self.script.get_mut(&(self.slave, register)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(ScriptedRead::Timeout),
            Some(queue) => queue.front().cloned().unwrap_or(ScriptedRead::Timeout),
            None => ScriptedRead::Timeout,
        }
    }
}

#[async_trait::async_trait]
impl BusTransport for FakeBus {
    fn configure(&mut self, settings: &SerialSettings) -> Result<(), TransportError> {
        if self.fail_configure {
            return Err(TransportError::Serial("scripted configure failure".into()));
        }
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn set_slave(&mut self, address: u8) {
        self.slave = address;
        if let Some(settings) = &self.settings {
            self.configured.push((address, settings.clone()));
        }
    }

    async fn read_float(&mut self, register: u16) -> Result<f32, TransportError> {
        self.reads.push((self.slave, register));
        let timeout = self
            .settings
            .as_ref()
            .map(|s| s.timeout)
            .unwrap_or_default();
        self.next_answer(register).into_result(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Parity;

    fn settings() -> SerialSettings {
        SerialSettings {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::Even,
            stop_bits: 1,
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_script_consumed_then_last_repeats() {
        let mut bus = FakeBus::new().script(
            1,
            100,
            [ScriptedRead::Timeout, ScriptedRead::Value(1.0), ScriptedRead::Value(2.0)],
        );
        bus.configure(&settings()).unwrap();
        bus.set_slave(1);

        assert!(matches!(
            bus.read_float(100).await,
            Err(TransportError::Timeout(_))
        ));
        assert_eq!(bus.read_float(100).await.unwrap(), 1.0);
        assert_eq!(bus.read_float(100).await.unwrap(), 2.0);
        assert_eq!(bus.read_float(100).await.unwrap(), 2.0);
        assert_eq!(bus.read_count(1, 100), 4);
    }

    #[tokio::test]
    async fn test_unscripted_register_times_out() {
        let mut bus = FakeBus::new().with_value(1, 100, 5.0);
        bus.configure(&settings()).unwrap();
        bus.set_slave(2);

        assert!(matches!(
            bus.read_float(100).await,
            Err(TransportError::Timeout(t)) if t == Duration::from_millis(500)
        ));
        assert_eq!(bus.configured().len(), 1);
        assert_eq!(bus.configured()[0].0, 2);
    }

    #[test]
    fn test_configure_failure() {
        let mut bus = FakeBus::new().with_configure_failure();
        assert!(matches!(
            bus.configure(&settings()),
            Err(TransportError::Serial(_))
        ));
    }
}
