//! Raw diagnostic listener.
//!
//! Reads the link in a background thread and reports every chunk, every
//! decoded frame and every protocol error. The listener holds the port
//! lock while it runs, so it implements [`PollerControl`] and the injector
//! stops it before a batch and restarts it afterwards.

use {
    crate::{
        connection::{MAX_READ_LEN, SharedPort},
        error::{Error, Result},
        port::{Port, SerialConfig},
        protocol::{frame::FrameParser, futurex::DecodedResponse},
        store::PollerControl,
    },
    log::{debug, info, warn},
    std::{
        fmt::Write as _,
        sync::{
            Arc, Mutex, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// How long a single read may block before the stop flag is checked again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Something seen on the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Raw bytes as read.
    Bytes(Vec<u8>),
    /// A frame that passed the checksum.
    Frame(DecodedResponse),
    /// A frame or line noise the parser rejected.
    ProtocolError(String),
}

type Handler = Box<dyn FnMut(&ListenerEvent) + Send>;

/// Background reader sharing the port with the injector.
pub struct Listener<P> {
    port: SharedPort<P>,
    config: SerialConfig,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    handler: Arc<Mutex<Handler>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Port + 'static> Listener<P> {
    /// Create a stopped listener that reports to `handler`.
    pub fn new(
        port: SharedPort<P>,
        config: SerialConfig,
        handler: impl FnMut(&ListenerEvent) + Send + 'static,
    ) -> Self {
        Self {
            port,
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            handler: Arc::new(Mutex::new(Box::new(handler))),
            worker: Mutex::new(None),
        }
    }

    /// Override the read poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start reading in the background. Starting a running listener is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Reap a worker that ended on its own
        if let Some(old) = worker.take() {
            let _ = old.join();
        }

        let port = self.port.clone();
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let handler = Arc::clone(&self.handler);
        let interval = self.poll_interval;

        let spawned = thread::Builder::new()
            .name("keyinject-listener".to_string())
            .spawn(move || {
                let result = port.with_connection(&config, |conn| {
                    info!("Listening on {}", conn.port_name());
                    let mut parser = FrameParser::new();
                    while running.load(Ordering::SeqCst) && !crate::is_interrupted_requested() {
                        let chunk = match conn.read_with_timeout(MAX_READ_LEN, interval) {
                            Ok(chunk) => chunk,
                            Err(Error::Timeout(_)) => continue,
                            Err(e) => return Err(e),
                        };
                        let mut guard = handler
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        let report = &mut **guard;
                        report(&ListenerEvent::Bytes(chunk.clone()));
                        parser.append(&chunk);
                        while let Some(frame) = parser.next_message() {
                            report(&ListenerEvent::Frame(frame));
                        }
                        for error in parser.take_errors() {
                            report(&ListenerEvent::ProtocolError(error));
                        }
                    }
                    Ok(())
                });
                if let Err(e) = result {
                    warn!("Listener stopped: {e}");
                }
                running.store(false, Ordering::SeqCst);
                debug!("Listener thread exited");
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            },
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            },
        }
    }

    /// Stop reading and wait until the port is released.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Listener thread panicked");
            }
        }
    }

    /// Whether the background reader is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl<P> Drop for Listener<P> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl<P: Port + 'static> PollerControl for Listener<P> {
    fn is_active(&self) -> bool {
        self.is_running()
    }

    fn stop(&self) {
        Listener::stop(self);
    }

    fn restart(&self) {
        if let Err(e) = self.start() {
            warn!("Failed to restart listener: {e}");
        }
    }
}

/// Space-separated uppercase hex, e.g. `02 30 33 03`.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Printable ASCII with everything else shown as `.`.
pub fn ascii_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
        .collect()
}
