//! # keyinject
//!
//! Key-injection protocol engine for POS terminals speaking the Futurex
//! serial protocol.
//!
//! The engine turns "load this key into that slot" into a checksummed frame,
//! sends it over a shared serial link and turns the terminal's reply into a
//! typed outcome:
//!
//! - [`key`]: slot/key model and pre-flight validation
//! - [`protocol`]: framing, LRC, command builders, reply decoding
//! - [`classify`]: reply to outcome mapping
//! - [`connection`]: exclusive open/use/close of the shared port
//! - [`injector`]: the batch state machine
//! - [`session`]: maintenance commands (serial number, key erase, brand check)
//! - [`listener`]: raw diagnostic reader
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization of the key model and discovered ports
//!
//! ## Example
//!
//! ```rust,no_run
//! use keyinject::{
//!     AlgorithmFamily, InjectionBatch, Injector, KeySlotConfig, KeyUsage, MemoryKeyStore,
//!     NoPoller, SerialConfig, SharedPort, StoredKeyRecord,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keys: MemoryKeyStore = [StoredKeyRecord::new(
//!         "ABCD1234EF",
//!         "0123456789ABCDEFFEDCBA9876543210",
//!         AlgorithmFamily::Tdes,
//!     )]
//!     .into_iter()
//!     .collect();
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = SharedPort::new(keyinject::NativePort::new("/dev/ttyUSB0"));
//!         let config = SerialConfig::new("/dev/ttyUSB0", 115200);
//!         let mut injector = Injector::new(port, config, keys, NoPoller);
//!         injector.start(InjectionBatch::new(
//!             "retail",
//!             vec![KeySlotConfig::new(KeyUsage::Pin, "PIN Encryption Key", "01", "ABCD1234EF")],
//!         ))?;
//!         for line in &injector.state().log {
//!             println!("{line}");
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod classify;
pub mod connection;
pub mod device;
pub mod error;
pub mod injector;
pub mod key;
pub mod listener;
pub mod port;
pub mod protocol;
pub mod session;
pub mod store;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the
/// diagnostic listener polls it; an injection batch always runs to the end.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    classify::{Outcome, classify, classify_command},
    connection::{Connection, SharedPort},
    device::{DetectedPort, DeviceKind, auto_detect_port, detect_ports, format_port_list},
    error::{Error, Result, ValidationError},
    injector::{
        InjectionEvent, InjectionState, InjectionStatus, InjectionTiming, Injector, prepare_step,
    },
    key::{AlgorithmFamily, InjectionBatch, KeySlotConfig, KeyUsage, StoredKeyRecord, validate},
    listener::{Listener, ListenerEvent, ascii_preview, hex_dump},
    port::{DEFAULT_BAUD, Port, SerialConfig},
    protocol::{CommandPayload, DecodedResponse, DeviceBrand, FrameParser, encode},
    session::{BrandCheck, Session, check_brand, exchange},
    store::{KeyStore, MemoryKeyStore, MemoryProfileStore, NoPoller, PollerControl, ProfileStore},
};
