//! Injection orchestrator.
//!
//! Drives a batch of slot configurations through validate, build, frame,
//! exchange and classify, one step at a time, on a single connection:
//!
//! ```text
//! IDLE --start--> CONNECTING --opened--> INJECTING --all done--> SUCCESS
//!                      |                     |
//!                      +------ failure ------+--> ERROR --retry--> CONNECTING
//!
//! dismiss: IDLE | SUCCESS | ERROR --> IDLE
//! ```
//!
//! The first failure stops the batch. Later steps are never attempted and
//! the log keeps everything written before the failure.
//!
//! With [`Injector::with_brand_check`] the terminal is asked to confirm its
//! brand (`08`) before step 1. A mismatch fails the batch; a check the
//! terminal cannot answer is logged and the batch goes on.

use {
    crate::{
        classify::{Outcome, classify},
        connection::{Connection, READ_TIMEOUT, SharedPort, WRITE_TIMEOUT},
        error::{Error, Result, ValidationError},
        key::{InjectionBatch, KeySlotConfig, StoredKeyRecord, mask_key, validate},
        port::{Port, SerialConfig},
        protocol::{
            command::{CommandPayload, DeviceBrand, build_inject_key},
            futurex::RESPONSE_BRAND_MISMATCH,
        },
        session::{BrandCheck, check_brand, exchange},
        store::{KeyStore, PollerControl},
    },
    log::{debug, info, warn},
    std::{fmt, thread, time::Duration},
};

/// Look up, validate and build the inject command for one step.
///
/// Nothing here touches the port, so a batch can be checked (or printed)
/// before a connection is opened.
pub fn prepare_step<K: KeyStore + ?Sized>(
    keys: &K,
    step: &KeySlotConfig,
) -> Result<(StoredKeyRecord, CommandPayload)> {
    let record = keys
        .lookup_by_check_value(&step.selected_key_ref)
        .ok_or_else(|| ValidationError::KeyNotFound(step.selected_key_ref.clone()))?;
    validate(&record, step)?;
    let command = build_inject_key(step, &record)?;
    Ok((record, command))
}

/// Delays and timeouts used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionTiming {
    /// Bound for writing one frame.
    pub write_timeout: Duration,
    /// Bound for receiving one reply.
    pub read_timeout: Duration,
    /// Pause between two steps so the firmware can settle.
    pub step_settle: Duration,
    /// Pause after stopping the background poller, before opening.
    pub poller_settle: Duration,
    /// Pause after closing, before the background poller is restarted.
    pub restart_delay: Duration,
}

impl Default for InjectionTiming {
    fn default() -> Self {
        Self {
            write_timeout: WRITE_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            step_settle: Duration::from_millis(500),
            poller_settle: Duration::from_secs(1),
            restart_delay: Duration::from_millis(500),
        }
    }
}

impl InjectionTiming {
    /// Set the reply timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the frame write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set every settle delay at once.
    #[must_use]
    pub fn with_settle_delays(mut self, step: Duration, poller: Duration, restart: Duration) -> Self {
        self.step_settle = step;
        self.poller_settle = poller;
        self.restart_delay = restart;
        self
    }
}

/// Orchestrator status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionStatus {
    /// Nothing running.
    #[default]
    Idle,
    /// Acquiring and opening the port.
    Connecting,
    /// Running steps.
    Injecting,
    /// Every step succeeded.
    Success,
    /// A step failed; the log holds what happened before.
    Error,
}

impl fmt::Display for InjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Injecting => "INJECTING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        })
    }
}

/// Observable state of the orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InjectionState {
    /// Current status.
    pub status: InjectionStatus,
    /// 1-based index of the step being run (0 before the first step).
    pub step_index: usize,
    /// Number of steps in the batch.
    pub total_steps: usize,
    /// Append-only log, oldest line first.
    pub log: Vec<String>,
    /// Message of the error that ended the batch.
    pub error: Option<String>,
}

impl InjectionState {
    /// Fraction of steps reached, in `0.0..=1.0`.
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.step_index as f64 / self.total_steps as f64
    }
}

/// Notification sent to the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectionEvent {
    /// Status moved.
    StateChanged(InjectionStatus),
    /// A step started.
    Progress {
        /// 1-based step index.
        step_index: usize,
        /// Number of steps.
        total_steps: usize,
    },
    /// A line was appended to the log.
    Log(String),
    /// Non-fatal notice that did not change the state.
    Notice(String),
}

type Observer = Box<dyn FnMut(&InjectionEvent) + Send>;

/// Runs injection batches against one terminal.
pub struct Injector<P, K, L> {
    port: SharedPort<P>,
    config: SerialConfig,
    keys: K,
    poller: L,
    timing: InjectionTiming,
    brand_check: Option<DeviceBrand>,
    state: InjectionState,
    last_batch: Option<InjectionBatch>,
    observer: Option<Observer>,
}

impl<P, K, L> Injector<P, K, L>
where
    P: Port,
    K: KeyStore,
    L: PollerControl,
{
    /// Create an idle orchestrator.
    pub fn new(port: SharedPort<P>, config: SerialConfig, keys: K, poller: L) -> Self {
        Self {
            port,
            config,
            keys,
            poller,
            timing: InjectionTiming::default(),
            brand_check: None,
            state: InjectionState::default(),
            last_batch: None,
            observer: None,
        }
    }

    /// Replace the default timing.
    #[must_use]
    pub fn with_timing(mut self, timing: InjectionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Check the terminal brand before the first step of every batch.
    #[must_use]
    pub fn with_brand_check(mut self, expected: DeviceBrand) -> Self {
        self.brand_check = Some(expected);
        self
    }

    /// Register the observer for state, progress and log events.
    pub fn on_event(&mut self, observer: impl FnMut(&InjectionEvent) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Current state.
    pub fn state(&self) -> &InjectionState {
        &self.state
    }

    /// Run `batch` from its first step.
    ///
    /// Accepted from IDLE and ERROR. An empty batch only raises a notice and
    /// leaves the orchestrator IDLE. Returns the error that ended the batch,
    /// which is also kept in [`InjectionState::error`].
    pub fn start(&mut self, batch: InjectionBatch) -> Result<()> {
        match self.state.status {
            InjectionStatus::Idle | InjectionStatus::Error => {},
            status => {
                return Err(Error::InvalidState(format!(
                    "cannot start a batch while {status}"
                )));
            },
        }

        if batch.is_empty() {
            self.state = InjectionState::default();
            self.last_batch = None;
            self.emit(InjectionEvent::Notice(format!(
                "Profile {} has no key slots to inject",
                batch.profile
            )));
            return Ok(());
        }

        let result = self.run(&batch);
        self.last_batch = Some(batch);
        result
    }

    /// Re-run the last failed batch from step 1.
    pub fn retry(&mut self) -> Result<()> {
        if self.state.status != InjectionStatus::Error {
            return Err(Error::InvalidState(format!(
                "nothing to retry while {}",
                self.state.status
            )));
        }
        let batch = self
            .last_batch
            .take()
            .ok_or_else(|| Error::InvalidState("no batch to retry".to_string()))?;
        info!("Retrying profile {} from the first step", batch.profile);
        self.start(batch)
    }

    /// Clear the state and return to IDLE.
    pub fn dismiss(&mut self) -> Result<()> {
        match self.state.status {
            InjectionStatus::Idle | InjectionStatus::Success | InjectionStatus::Error => {
                self.state = InjectionState::default();
                self.last_batch = None;
                self.emit(InjectionEvent::StateChanged(InjectionStatus::Idle));
                Ok(())
            },
            status => Err(Error::InvalidState(format!("cannot dismiss while {status}"))),
        }
    }

    fn run(&mut self, batch: &InjectionBatch) -> Result<()> {
        self.state = InjectionState {
            total_steps: batch.len(),
            ..InjectionState::default()
        };
        info!(
            "Injecting profile {} ({} keys) on {}",
            batch.profile,
            batch.len(),
            self.config.port_name
        );

        self.set_status(InjectionStatus::Connecting);
        let poller_was_active = self.poller.is_active();
        if poller_was_active {
            debug!("Stopping background poller");
            self.poller.stop();
            thread::sleep(self.timing.poller_settle);
        }

        let port = self.port.clone();
        let config = self.config.clone();
        let timing = self.timing;
        let result = port.with_connection(&config, |conn| {
            conn.set_write_timeout(timing.write_timeout);
            conn.set_read_timeout(timing.read_timeout);
            self.inject_all(conn, batch)
        });

        match &result {
            Ok(()) => {
                self.append_log(format!("Injection of {} complete", batch.profile));
                self.set_status(InjectionStatus::Success);
            },
            Err(e) => {
                self.state.error = Some(e.to_string());
                self.set_status(InjectionStatus::Error);
            },
        }

        if poller_was_active {
            thread::sleep(self.timing.restart_delay);
            debug!("Restarting background poller");
            self.poller.restart();
        }

        result
    }

    fn inject_all(&mut self, conn: &mut Connection<'_, P>, batch: &InjectionBatch) -> Result<()> {
        self.set_status(InjectionStatus::Injecting);
        let total = batch.len();

        if let Some(expected) = self.brand_check {
            self.verify_brand(conn, expected)?;
            thread::sleep(self.timing.step_settle);
        }

        for (i, step) in batch.steps.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.timing.step_settle);
            }
            let step_index = i + 1;
            self.state.step_index = step_index;
            self.emit(InjectionEvent::Progress {
                step_index,
                total_steps: total,
            });

            let prefix = format!("[{step_index}/{total}] {} slot {}", step.usage, step.slot);
            match self.inject_one(conn, step) {
                Ok(kcv) => self.append_log(format!("{prefix}: injected (KCV {kcv})")),
                Err(e) => {
                    self.append_log(format!("{prefix}: {e}"));
                    return Err(e);
                },
            }
        }
        Ok(())
    }

    /// Only a reported mismatch is fatal.
    fn verify_brand(&mut self, conn: &mut Connection<'_, P>, expected: DeviceBrand) -> Result<()> {
        match check_brand(conn, expected) {
            Ok(BrandCheck::Match) => self.append_log(format!("Device brand {expected} confirmed")),
            Ok(BrandCheck::Mismatch { actual }) => {
                let err = Error::Device {
                    code: RESPONSE_BRAND_MISMATCH.to_string(),
                    description: format!(
                        "Device brand mismatch: expected {expected}, terminal reports {actual}"
                    ),
                };
                self.append_log(format!("Brand check: {err}"));
                return Err(err);
            },
            Err(e) => {
                warn!("Brand check not answered, continuing: {e}");
                self.append_log(format!("Brand check skipped: {e}"));
            },
        }
        Ok(())
    }

    /// Run one step; returns the checksum the terminal confirmed.
    fn inject_one(&mut self, conn: &mut Connection<'_, P>, step: &KeySlotConfig) -> Result<String> {
        let (record, command) = prepare_step(&self.keys, step)?;
        debug!(
            "Slot {} <- {} key {} ({} bytes)",
            step.slot,
            step.key_type,
            mask_key(&record.key_data_hex),
            record.byte_len()
        );

        let reply = exchange(conn, &command)?;
        let Outcome::Success { key_checksum, .. } = classify(&reply).into_result()? else {
            return Err(Error::UnexpectedMessage(reply.raw_payload().to_string()));
        };

        let sent = record
            .check_value
            .get(..4)
            .unwrap_or(&record.check_value);
        if !key_checksum.eq_ignore_ascii_case(sent) {
            warn!("Slot {}: terminal reported checksum {key_checksum}, sent {sent}", step.slot);
        }
        Ok(key_checksum)
    }

    fn set_status(&mut self, status: InjectionStatus) {
        debug!("Injection state {} -> {status}", self.state.status);
        self.state.status = status;
        self.emit(InjectionEvent::StateChanged(status));
    }

    fn append_log(&mut self, line: String) {
        info!("{line}");
        self.state.log.push(line.clone());
        self.emit(InjectionEvent::Log(line));
    }

    fn emit(&mut self, event: InjectionEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }
}
