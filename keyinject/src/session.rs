//! Request/response exchanges and one-shot maintenance commands.

use {
    crate::{
        classify::{Outcome, classify_command},
        connection::{Connection, MAX_READ_LEN, SharedPort},
        error::{Error, Result},
        port::{Port, SerialConfig},
        protocol::{
            command::{self, CommandPayload, DeviceBrand},
            frame::FrameParser,
            futurex::{CMD_VALIDATE_BRAND, DecodedResponse, RESPONSE_BRAND_MISMATCH},
        },
    },
    log::{debug, info, trace, warn},
    std::time::Instant,
};

/// Send one command and wait for the first intact reply frame.
///
/// Bytes are read in chunks of at most [`MAX_READ_LEN`] into a fresh
/// parser until a frame decodes or the connection's read timeout runs out.
/// A corrupted frame fails the exchange immediately. Running out of time
/// with a partial frame buffered is a protocol error, not a timeout.
pub fn exchange<P: Port + ?Sized>(
    conn: &mut Connection<'_, P>,
    command: &CommandPayload,
) -> Result<DecodedResponse> {
    let frame = command.encode();
    debug!("TX command {} ({} bytes) on {}", command.code, frame.len(), conn.port_name());
    conn.write(&frame)?;

    let mut parser = FrameParser::new();
    let timeout = conn.read_timeout();
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let read = if remaining.is_zero() {
            Err(Error::Timeout(format!(
                "no reply to command {} within {} ms",
                command.code,
                timeout.as_millis()
            )))
        } else {
            conn.read_with_timeout(MAX_READ_LEN, remaining)
        };

        let chunk = match read {
            Ok(chunk) => chunk,
            Err(Error::Timeout(reason)) => {
                if parser.flush_incomplete() {
                    return Err(Error::Protocol(parser.take_errors().join("; ")));
                }
                return Err(Error::Timeout(reason));
            },
            Err(e) => return Err(e),
        };
        trace!("RX {} bytes", chunk.len());
        parser.append(&chunk);

        let message = parser.next_message();
        let errors = parser.take_errors();
        if !errors.is_empty() {
            return Err(Error::Protocol(errors.join("; ")));
        }
        if let Some(message) = message {
            debug!("RX payload {}", message.raw_payload());
            return Ok(message);
        }
    }
}

/// Result of a brand check that the terminal answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrandCheck {
    /// The terminal is of the expected brand.
    Match,
    /// The terminal reports a different brand.
    Mismatch {
        /// Brand the terminal reports.
        actual: DeviceBrand,
    },
}

/// Ask the terminal whether it is of brand `expected` (`08`).
///
/// A `2A` reply is a [`BrandCheck::Mismatch`]; any other device error is
/// returned as [`Error::Device`].
pub fn check_brand<P: Port + ?Sized>(
    conn: &mut Connection<'_, P>,
    expected: DeviceBrand,
) -> Result<BrandCheck> {
    let reply = exchange(conn, &command::validate_brand(expected))?;
    match &reply {
        DecodedResponse::Command(response)
            if response.command == CMD_VALIDATE_BRAND
                && response.response_code == RESPONSE_BRAND_MISMATCH =>
        {
            let actual = DeviceBrand::from_code(response.data.get(..2).unwrap_or_default());
            warn!("Device brand mismatch: expected {expected}, terminal reports {actual}");
            return Ok(BrandCheck::Mismatch { actual });
        },
        _ => {},
    }
    classify_command(&reply, CMD_VALIDATE_BRAND).into_result()?;
    debug!("Device brand {expected} confirmed");
    Ok(BrandCheck::Match)
}

/// Maintenance commands, each on its own connection.
pub struct Session<P> {
    port: SharedPort<P>,
    config: SerialConfig,
}

impl<P: Port> Session<P> {
    /// Create a session over a shared port.
    pub fn new(port: SharedPort<P>, config: SerialConfig) -> Self {
        Self { port, config }
    }

    fn run(&self, command: &CommandPayload) -> Result<String> {
        let reply = self
            .port
            .with_connection(&self.config, |conn| exchange(conn, command))?;
        match classify_command(&reply, command.code).into_result()? {
            Outcome::Success { data, .. } => Ok(data),
            // into_result only lets successes through
            other => Err(Error::UnexpectedMessage(format!("{other:?}"))),
        }
    }

    /// Read the terminal serial number.
    pub fn read_serial(&self) -> Result<String> {
        let serial = self.run(&command::read_serial())?;
        info!("Terminal serial number: {serial}");
        Ok(serial)
    }

    /// Write the terminal serial number (16 alphanumeric characters).
    pub fn write_serial(&self, serial: &str) -> Result<()> {
        let cmd = command::write_serial(serial)?;
        self.run(&cmd)?;
        info!("Terminal serial number set to {serial}");
        Ok(())
    }

    /// Erase every key in the terminal.
    pub fn delete_all_keys(&self) -> Result<()> {
        self.run(&command::delete_all_keys())?;
        info!("All keys erased");
        Ok(())
    }

    /// Check that the terminal is of brand `expected`.
    pub fn validate_brand(&self, expected: DeviceBrand) -> Result<BrandCheck> {
        let check = self
            .port
            .with_connection(&self.config, |conn| check_brand(conn, expected))?;
        if check == BrandCheck::Match {
            info!("Terminal brand is {expected}");
        }
        Ok(check)
    }

    /// Erase the key held in `slot`.
    pub fn delete_key(&self, slot: &str, key_type: &str) -> Result<()> {
        let cmd = command::delete_key(slot, key_type)?;
        self.run(&cmd)?;
        info!("Key in slot {slot} erased");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{port::mock::MockPort, protocol::frame::encode},
    };

    fn session(port: MockPort) -> Session<MockPort> {
        Session::new(SharedPort::new(port), SerialConfig::new("mock", 115200))
    }

    #[test]
    fn test_read_serial() {
        let port = MockPort::new(|_| vec![encode("03", &["00", "N9100000000042"])]);
        assert_eq!(session(port).read_serial().unwrap(), "N9100000000042");
    }

    #[test]
    fn test_write_serial_sends_field() {
        let port = MockPort::new(|_| vec![encode("04", &["00"])]);
        let state = port.state();
        session(port)
            .write_serial("ABCDEF0123456789")
            .unwrap();
        let written = state.lock().unwrap().written[0].clone();
        assert_eq!(written, encode("04", &["01", "ABCDEF0123456789"]));
    }

    #[test]
    fn test_invalid_serial_never_opens_port() {
        let port = MockPort::new(|_| Vec::new());
        let state = port.state();
        assert!(matches!(
            session(port).write_serial("short"),
            Err(Error::Validation(_))
        ));
        assert!(state.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn test_delete_key_device_error() {
        let port = MockPort::new(|_| vec![encode("06", &["0B"])]);
        let err = session(port)
            .delete_key("01", "PIN")
            .unwrap_err();
        assert!(matches!(err, Error::Device { ref description, .. } if description == "Key deletion failed"));
    }

    #[test]
    fn test_reply_split_across_reads() {
        let port = MockPort::new(|_| {
            let frame = encode("05", &["00"]);
            frame.chunks(2).map(<[u8]>::to_vec).collect()
        });
        assert!(session(port).delete_all_keys().is_ok());
    }

    #[test]
    fn test_corrupt_reply_is_protocol_error() {
        let port = MockPort::new(|_| {
            let mut frame = encode("05", &["00"]);
            let last = frame.len() - 1;
            frame[last] ^= 0x20;
            vec![frame]
        });
        assert!(matches!(session(port).delete_all_keys(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_reply_with_corrupted_end_marker_is_protocol_error() {
        // '#' in place of ETX; the LRC (0x70) is printable too, so the
        // parser keeps waiting for an end marker that never comes.
        let port = MockPort::new(|_| {
            let mut frame = encode("03", &["00", "N9100000000042"]);
            let etx_index = frame.len() - 2;
            frame[etx_index] ^= 0x20;
            vec![frame]
        });
        let err = session(port).read_serial().unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ref m) if m.contains("Incomplete or malformed frame")),
            "got {err:?}"
        );
    }

    #[test]
    fn test_validate_brand_match() {
        let port = MockPort::new(|_| vec![encode("08", &["00"])]);
        let state = port.state();
        let check = session(port).validate_brand(DeviceBrand::Newpos).unwrap();
        assert_eq!(check, BrandCheck::Match);
        assert_eq!(state.lock().unwrap().written[0], encode("08", &["AA", "01"]));
    }

    #[test]
    fn test_validate_brand_mismatch_reports_actual_brand() {
        let port = MockPort::new(|_| vec![encode("08", &["2A", "02"])]);
        let check = session(port).validate_brand(DeviceBrand::Aisino).unwrap();
        assert_eq!(
            check,
            BrandCheck::Mismatch {
                actual: DeviceBrand::Urovo
            }
        );
    }

    #[test]
    fn test_validate_brand_other_error_is_device_error() {
        let port = MockPort::new(|_| vec![encode("08", &["0D"])]);
        let err = session(port).validate_brand(DeviceBrand::Urovo).unwrap_err();
        assert!(matches!(err, Error::Device { ref code, .. } if code == "0D"));
    }

    #[test]
    fn test_no_reply_times_out() {
        let port = MockPort::new(|_| Vec::new());
        assert!(matches!(session(port).delete_all_keys(), Err(Error::Timeout(_))));
    }

    #[test]
    fn test_wrong_reply_type_is_unexpected() {
        let port = MockPort::new(|_| vec![encode("02", &["00", "ABCD"])]);
        assert!(matches!(session(port).read_serial(), Err(Error::UnexpectedMessage(_))));
    }
}
