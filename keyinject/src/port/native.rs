//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{DataBits, FlowControl, Parity, Port, SerialConfig, StopBits},
    },
    log::{debug, trace},
    std::{
        io::{ErrorKind, Read, Write},
        time::Duration,
    },
};

/// Timeout used while opening; per-call timeouts replace it afterwards.
const OPEN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Native serial port implementation.
///
/// Created closed; `init` records line settings and `open` applies them.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    config: SerialConfig,
}

impl NativePort {
    /// Create a closed port for the given device path.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port: None,
            config: SerialConfig {
                port_name: port_name.into(),
                ..SerialConfig::default()
            },
        }
    }

    fn inner(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Connection(format!("{} is not open", self.config.port_name)))
    }
}

impl Port for NativePort {
    fn init(&mut self, config: &SerialConfig) -> Result<()> {
        trace!(
            "Init {}: {} baud, {:?}/{:?}/{:?}",
            self.config.port_name, config.baud_rate, config.data_bits, config.parity, config.stop_bits
        );
        let name = std::mem::take(&mut self.config.port_name);
        self.config = SerialConfig {
            port_name: if config.port_name.is_empty() {
                name
            } else {
                config.port_name.clone()
            },
            ..config.clone()
        };
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.config.port_name, self.config.baud_rate)
            .timeout(OPEN_TIMEOUT)
            .data_bits(self.config.data_bits.into())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits.into())
            .flow_control(self.config.flow_control.into())
            .open()
            .map_err(|e| Error::Connection(format!("cannot open {}: {e}", self.config.port_name)))?;
        debug!("Opened {} at {} baud", self.config.port_name, self.config.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        let port = self.inner()?;
        port.set_timeout(timeout)?;
        match port.write_all(data).and_then(|()| port.flush()) {
            Ok(()) => {
                trace!("Wrote {} bytes", data.len());
                Ok(data.len())
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.inner()?;
        port.set_timeout(timeout)?;
        match port.read(buf) {
            Ok(n) => {
                trace!("Read {n} bytes");
                Ok(n)
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the device
        if self.port.take().is_some() {
            debug!("Closed {}", self.config.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn name(&self) -> &str {
        &self.config.port_name
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_port_is_closed() {
        let port = NativePort::new("/dev/ttyUSB0");
        assert!(!port.is_open());
        assert_eq!(port.name(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_io_on_closed_port_is_connection_error() {
        let mut port = NativePort::new("/dev/null-port");
        let mut buf = [0u8; 8];
        assert!(matches!(
            port.read(&mut buf, Duration::from_millis(1)),
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            port.write(b"x", Duration::from_millis(1)),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn test_init_keeps_name_when_config_has_none() {
        let mut port = NativePort::new("COM7");
        port.init(&SerialConfig::default().with_parity(Parity::Odd))
            .unwrap();
        assert_eq!(port.name(), "COM7");
    }

    #[test]
    fn test_open_missing_device_fails() {
        let mut port = NativePort::new("/definitely/not/a/port");
        assert!(matches!(port.open(), Err(Error::Connection(_))));
        // Close after a failed open is harmless
        assert!(port.close().is_ok());
    }
}
