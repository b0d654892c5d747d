//! Per-device register readout with bounded retry.

use tokio::time::Instant;

use thiserror::Error;

use crate::bus::{BusTransport, ParityConfigError, ReadOutcome, SerialSettings, TransportError};
use crate::config::{DeviceDescriptor, ParameterMap};
use crate::storage::Sample;

/// Attempts per parameter before the device is given up for the cycle.
pub const DEFAULT_READ_ATTEMPTS: u32 = 10;

/// Errors that exclude one device from a cycle.
#[derive(Debug, Error)]
pub enum ReadError {
    /// Configured parity is not supported.
    #[error(transparent)]
    Parity(#[from] ParityConfigError),

    /// Retry budget exhausted on one parameter.
    #[error(
        "failed to read '{parameter}' (register {register}) from meter {device_id} after {attempts} attempts: {last_error}"
    )]
    ReadFailure {
        device_id: u8,
        parameter: String,
        register: u16,
        attempts: u32,
        #[source]
        last_error: TransportError,
    },

    /// Non-retryable transport fault.
    #[error("transport fault on meter {device_id}: {source}")]
    Transport {
        device_id: u8,
        #[source]
        source: TransportError,
    },
}

/// Reads every parameter of a device through an exclusively owned transport.
#[derive(Debug)]
pub struct RegisterReader<T> {
    transport: T,
    attempts: u32,
}

impl<T: BusTransport> RegisterReader<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            attempts: DEFAULT_READ_ATTEMPTS,
        }
    }

    /// Set the per-parameter attempt budget (at least 1).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Configure the bus for `device` and read every parameter of `params`.
    ///
    /// The returned sample holds exactly the parameters of `params`, plus the
    /// time spent reading. Any error discards the partial sample.
    ///
    /// # Errors
    /// - `ReadError::Parity` if the device's parity is unsupported
    /// - `ReadError::Transport` on a fault retrying cannot fix
    /// - `ReadError::ReadFailure` once a parameter exhausts its attempts
    pub async fn read_all(
        &mut self,
        device: &DeviceDescriptor,
        params: &ParameterMap,
    ) -> Result<Sample, ReadError> {
        let settings = SerialSettings::from_params(&device.bus)?;
        self.transport
            .configure(&settings)
            .map_err(|source| ReadError::Transport {
                device_id: device.id,
                source,
            })?;
        self.transport.set_slave(device.id);

        let start = Instant::now();
        let mut sample = Sample::new();
        for (parameter, register) in params.iter() {
            let value = self.read_register(device, parameter, register).await?;
            sample.insert(parameter, f64::from(value));
        }
        let elapsed = start.elapsed();

        tracing::debug!(
            device_id = device.id,
            meter = %device.name,
            parameters = params.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Meter read"
        );
        Ok(sample.with_read_duration(elapsed))
    }

    async fn read_register(
        &mut self,
        device: &DeviceDescriptor,
        parameter: &str,
        register: u16,
    ) -> Result<f32, ReadError> {
        let mut attempts_left = self.attempts;
        loop {
            attempts_left -= 1;
            match ReadOutcome::from(self.transport.read_float(register).await) {
                ReadOutcome::Value(value) => return Ok(value),
                ReadOutcome::Fatal(source) => {
                    return Err(ReadError::Transport {
                        device_id: device.id,
                        source,
                    });
                }
                ReadOutcome::Transient(kind, error) => {
                    tracing::warn!(
                        device_id = device.id,
                        meter = %device.name,
                        parameter,
                        register,
                        kind = %kind,
                        attempts_left,
                        error = %error,
                        "Failed to read register"
                    );
                    if attempts_left == 0 {
                        return Err(ReadError::ReadFailure {
                            device_id: device.id,
                            parameter: parameter.to_string(),
                            register,
                            attempts: self.attempts,
                            last_error: error,
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{FakeBus, Parity, ScriptedRead};
    use crate::config::BusParams;
    use crate::storage::READ_DURATION_FIELD;
    use std::time::Duration;

    fn device(id: u8, parity: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id,
            name: format!("meter-{id}"),
            model_ref: "modelX.yml".to_string(),
            bus: BusParams {
                baudrate: 9600,
                bytesize: 8,
                parity: parity.to_string(),
                stopbits: 1,
                timeout: 0.5,
            },
        }
    }

    fn params() -> ParameterMap {
        [("power", 100), ("voltage", 102)].into_iter().collect()
    }

    #[tokio::test]
    async fn test_read_all() {
        let bus = FakeBus::new()
            .with_value(1, 100, 230.5)
            .with_value(1, 102, 11.2);
        let mut reader = RegisterReader::new(bus);

        let sample = reader.read_all(&device(1, "even"), &params()).await.unwrap();
        assert_eq!(sample.values().len(), 2);
        assert_eq!(sample.get("power"), Some(230.5));
        assert_eq!(sample.get("voltage"), Some(f64::from(11.2f32)));
        assert!(sample.fields()[READ_DURATION_FIELD] >= 0.0);

        let configured = reader.transport().configured();
        assert_eq!(configured.len(), 1);
        assert_eq!(configured[0].0, 1);
        assert_eq!(configured[0].1.parity, Parity::Even);
        assert_eq!(configured[0].1.timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mut answers = vec![ScriptedRead::Timeout; 5];
        answers.extend([ScriptedRead::Malformed, ScriptedRead::Decode, ScriptedRead::Io]);
        answers.push(ScriptedRead::Exception(crate::bus::EXCEPTION_SLAVE_BUSY));
        answers.push(ScriptedRead::Value(42.0));
        let bus = FakeBus::new()
            .script(1, 100, answers)
            .with_value(1, 102, 1.0);
        let mut reader = RegisterReader::new(bus);

        let sample = reader.read_all(&device(1, "none"), &params()).await.unwrap();
        assert_eq!(sample.get("power"), Some(42.0));
        assert_eq!(reader.transport().read_count(1, 100), 10);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let bus = FakeBus::new()
            .with_value(1, 100, 1.0)
            .script(1, 102, [ScriptedRead::Timeout]);
        let mut reader = RegisterReader::new(bus);

        let err = reader.read_all(&device(1, "none"), &params()).await.unwrap_err();
        match err {
            ReadError::ReadFailure {
                device_id,
                parameter,
                register,
                attempts,
                last_error,
            } => {
                assert_eq!(device_id, 1);
                assert_eq!(parameter, "voltage");
                assert_eq!(register, 102);
                assert_eq!(attempts, DEFAULT_READ_ATTEMPTS);
                assert!(matches!(last_error, TransportError::Timeout(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(reader.transport().read_count(1, 102), 10);
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        let bus = FakeBus::new().script(1, 100, [ScriptedRead::Exception(0x02)]);
        let mut reader = RegisterReader::new(bus);

        let err = reader.read_all(&device(1, "none"), &params()).await.unwrap_err();
        assert!(matches!(
            err,
            ReadError::Transport {
                device_id: 1,
                source: TransportError::Exception { code: 0x02 }
            }
        ));
        assert_eq!(reader.transport().read_count(1, 100), 1);
        assert_eq!(reader.transport().read_count(1, 102), 0);
    }

    #[tokio::test]
    async fn test_invalid_parity() {
        let bus = FakeBus::new().with_value(1, 100, 1.0);
        let mut reader = RegisterReader::new(bus);

        let err = reader.read_all(&device(1, "invalid"), &params()).await.unwrap_err();
        assert!(matches!(err, ReadError::Parity(ref e) if e.value == "invalid"));
        assert!(reader.transport().reads().is_empty());
        assert!(reader.transport().configured().is_empty());
    }

    #[tokio::test]
    async fn test_configure_failure() {
        let bus = FakeBus::new().with_configure_failure();
        let mut reader = RegisterReader::new(bus);

        let err = reader.read_all(&device(3, "odd"), &params()).await.unwrap_err();
        assert!(matches!(
            err,
            ReadError::Transport {
                device_id: 3,
                source: TransportError::Serial(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_custom_attempts() {
        let bus = FakeBus::new().script(1, 100, [ScriptedRead::Io]);
        let mut reader = RegisterReader::new(bus).with_attempts(0);

        let err = reader.read_all(&device(1, "none"), &params()).await.unwrap_err();
        assert!(matches!(err, ReadError::ReadFailure { attempts: 1, .. }));
        assert_eq!(reader.transport_mut().read_count(1, 100), 1);
    }
}
