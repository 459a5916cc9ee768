//! Connection lifecycle over a shared serial port.
//!
//! Every consumer of the physical link (injector, maintenance commands,
//! diagnostic listener) goes through one [`SharedPort`]. A connection is
//! opened under the port lock, used by exactly one body, and always closed
//! on the way out.

use {
    crate::{
        error::{Error, Result},
        port::{Port, SerialConfig},
    },
    log::{debug, trace, warn},
    std::{
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::Duration,
    },
};

/// Default bound for a single write.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default bound for waiting on a reply.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest chunk requested from the port per read.
pub const MAX_READ_LEN: usize = 1024;

/// A serial port shared between every consumer of the same link.
pub struct SharedPort<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> Clone for SharedPort<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Port> SharedPort<P> {
    /// Wrap a port for shared use.
    pub fn new(port: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(port)),
        }
    }

    /// Acquire the port lock, blocking until it is free.
    ///
    /// A holder that panicked leaves the port in an unknown state, but every
    /// connection starts with `init` + `open`, so the lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection with `config`, run `body`, and close.
    ///
    /// Open failures become [`Error::Connection`]. Close failures are
    /// logged and never replace the body's result.
    pub fn with_connection<T, F>(&self, config: &SerialConfig, body: F) -> Result<T>
    where
        F: FnOnce(&mut Connection<'_, P>) -> Result<T>,
    {
        let mut port = self.lock();
        trace!("Acquired port lock for {}", config.port_name);

        let result = open(&mut *port, config).and_then(|()| {
            let mut conn = Connection {
                port: &mut *port,
                write_timeout: WRITE_TIMEOUT,
                read_timeout: READ_TIMEOUT,
            };
            body(&mut conn)
        });

        if let Err(e) = port.close() {
            warn!("Failed to close {}: {e}", port.name());
        } else {
            debug!("Connection to {} closed", port.name());
        }

        result
    }
}

fn open<P: Port + ?Sized>(port: &mut P, config: &SerialConfig) -> Result<()> {
    port.init(config)
        .map_err(into_connection_error)?;
    port.open()
        .map_err(into_connection_error)?;
    debug!(
        "Connection to {} open ({} baud, {:?} parity, {:?} data bits)",
        port.name(),
        config.baud_rate,
        config.parity,
        config.data_bits
    );
    Ok(())
}

fn into_connection_error(e: Error) -> Error {
    match e {
        Error::Connection(_) => e,
        other => Error::Connection(other.to_string()),
    }
}

/// An open connection, valid for the duration of one `with_connection` body.
pub struct Connection<'a, P: ?Sized> {
    port: &'a mut P,
    write_timeout: Duration,
    read_timeout: Duration,
}

impl<P: Port + ?Sized> Connection<'_, P> {
    /// Override the default write timeout.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    /// Override the default read timeout.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Current read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Write with the default timeout.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_with_timeout(data, self.write_timeout)
    }

    /// Write all of `data` within `timeout`.
    pub fn write_with_timeout(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let written = self.port.write(data, timeout)?;
        if written == 0 {
            return Err(Error::Timeout(format!(
                "write of {} bytes timed out after {} ms",
                data.len(),
                timeout.as_millis()
            )));
        }
        if written < data.len() {
            return Err(Error::Connection(format!(
                "short write: {written} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }

    /// Read up to `max_len` bytes with the default timeout.
    pub fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.read_with_timeout(max_len, self.read_timeout)
    }

    /// Read up to `max_len` bytes within `timeout`.
    ///
    /// Returns at least one byte or fails with [`Error::Timeout`].
    pub fn read_with_timeout(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.port.read(&mut buf, timeout)?;
        if n == 0 {
            return Err(Error::Timeout(format!(
                "no data within {} ms",
                timeout.as_millis()
            )));
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.port.name()
    }
}
