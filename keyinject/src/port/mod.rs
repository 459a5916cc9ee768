//! Port abstraction for the serial link to the terminal.
//!
//! The engine only consumes the transport through the [`Port`] trait:
//!
//! ```text
//! +------------------------+
//! |  Injector / Session    |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! |  Connection (locked)   |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+     +-------------------+
//! |      Port trait        +---->|  NativePort       |
//! +------------------------+     |  (serialport)     |
//!                                +-------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use keyinject::port::{Port, SerialConfig};
//! use std::time::Duration;
//!
//! fn example<P: Port>(port: &mut P) -> keyinject::Result<()> {
//!     port.init(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     port.open()?;
//!     port.write(b"\x020301\x03\x01", Duration::from_millis(1000))?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.read(&mut buf, Duration::from_secs(10))?;
//!     println!("Received: {:?}", &buf[..n]);
//!     port.close()
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use {crate::error::Result, std::time::Duration};

/// Default baud rate of injection firmware.
pub const DEFAULT_BAUD: u32 = 115200;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the parity.
    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the number of data bits.
    #[must_use]
    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

/// Serial transport consumed by the engine.
///
/// `write` and `read` report the number of bytes moved; `Ok(0)` means the
/// timeout elapsed with nothing transferred. Retrying is the caller's call.
pub trait Port: Send {
    /// Apply line settings. Called before every `open`.
    fn init(&mut self, config: &SerialConfig) -> Result<()>;

    /// Open the device.
    fn open(&mut self) -> Result<()>;

    /// Write bytes, blocking up to `timeout`.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Read up to `buf.len()` bytes, blocking up to `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the device. Closing an already closed port is not an error.
    fn close(&mut self) -> Result<()>;

    /// Whether the port is currently open.
    fn is_open(&self) -> bool;

    /// Port name/path.
    fn name(&self) -> &str;
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn init(&mut self, config: &SerialConfig) -> Result<()> {
        (**self).init(config)
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(data, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativePort;

/// Scripted in-memory port for unit tests.
#[cfg(test)]
pub(crate) mod mock {
    use {
        super::{Port, SerialConfig},
        crate::error::{Error, Result},
        std::{
            collections::VecDeque,
            sync::{Arc, Mutex},
            time::Duration,
        },
    };

    /// Call log shared between a test and the port it handed out.
    #[derive(Debug, Default)]
    pub struct MockState {
        pub calls: Vec<String>,
        pub written: Vec<Vec<u8>>,
        pub open: bool,
    }

    /// What the port does when the engine writes a frame.
    pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

    pub struct MockPort {
        pub state: Arc<Mutex<MockState>>,
        pending: VecDeque<Vec<u8>>,
        responder: Responder,
        pub fail_open: bool,
        pub fail_close: bool,
    }

    impl MockPort {
        /// Port that answers every write with the chunks `responder` returns.
        pub fn new(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState::default())),
                pending: VecDeque::new(),
                responder: Box::new(responder),
                fail_open: false,
                fail_close: false,
            }
        }

        /// Port with chunks already waiting to be read.
        pub fn with_incoming(chunks: Vec<Vec<u8>>) -> Self {
            let mut port = Self::new(|_| Vec::new());
            port.pending = chunks.into();
            port
        }

        pub fn state(&self) -> Arc<Mutex<MockState>> {
            Arc::clone(&self.state)
        }

        fn log(&self, call: &str) {
            self.state.lock().unwrap().calls.push(call.to_string());
        }
    }

    impl Port for MockPort {
        fn init(&mut self, config: &SerialConfig) -> Result<()> {
            self.log(&format!("init {}", config.baud_rate));
            Ok(())
        }

        fn open(&mut self) -> Result<()> {
            self.log("open");
            if self.fail_open {
                return Err(Error::Connection("device busy".to_string()));
            }
            self.state.lock().unwrap().open = true;
            Ok(())
        }

        fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize> {
            self.log("write");
            self.state.lock().unwrap().written.push(data.to_vec());
            let replies = (self.responder)(data);
            self.pending.extend(replies);
            Ok(data.len())
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let Some(mut chunk) = self.pending.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                self.pending.push_front(chunk);
            }
            Ok(n)
        }

        fn close(&mut self) -> Result<()> {
            self.log("close");
            self.state.lock().unwrap().open = false;
            if self.fail_close {
                return Err(Error::Connection("close failed".to_string()));
            }
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.state.lock().unwrap().open
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
