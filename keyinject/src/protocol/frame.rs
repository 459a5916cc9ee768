//! Wire framing: `STX | ASCII payload | ETX | LRC`.
//!
//! ```text
//! +------+-------------------------------+------+-----+
//! | 0x02 | command (2) + fields (ASCII)  | 0x03 | LRC |
//! +------+-------------------------------+------+-----+
//! ```
//!
//! The LRC is the XOR of every payload byte and the ETX byte. The parser
//! accepts data in arbitrary chunks and yields decoded payloads one at a
//! time; corrupted candidates are dropped and recorded, never decoded.

use {
    crate::protocol::{
        futurex::{DecodedResponse, FuturexDecoder, ResponseDecoder},
        lrc::frame_lrc,
    },
    log::{debug, trace, warn},
};

/// Start of text.
pub const STX: u8 = 0x02;

/// End of text.
pub const ETX: u8 = 0x03;

/// Largest buffered candidate before it is discarded as runaway input.
pub const MAX_FRAME_LEN: usize = 1024;

/// Build a complete frame from a command code and its ordered fields.
pub fn encode<S: AsRef<str>>(command: &str, fields: &[S]) -> Vec<u8> {
    let payload_len = command.len() + fields.iter().map(|f| f.as_ref().len()).sum::<usize>();
    let mut frame = Vec::with_capacity(payload_len + 3);

    frame.push(STX);
    frame.extend_from_slice(command.as_bytes());
    for field in fields {
        frame.extend_from_slice(field.as_ref().as_bytes());
    }
    frame.push(ETX);
    let lrc = frame_lrc(&frame[1..frame.len() - 1], ETX);
    frame.push(lrc);

    trace!("Encoded frame ({} bytes), LRC 0x{lrc:02X}", frame.len());
    frame
}

/// Stateful frame parser.
///
/// Feed bytes with [`append`](Self::append) and pull responses with
/// [`next_message`](Self::next_message). Protocol errors found while
/// scanning are kept until [`take_errors`](Self::take_errors) is called.
#[derive(Debug)]
pub struct FrameParser<D = FuturexDecoder> {
    buffer: Vec<u8>,
    decoder: D,
    errors: Vec<String>,
}

impl Default for FrameParser<FuturexDecoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser<FuturexDecoder> {
    /// Parser using the Futurex decoder.
    pub fn new() -> Self {
        Self::with_decoder(FuturexDecoder)
    }
}

impl<D: ResponseDecoder> FrameParser<D> {
    /// Parser with a custom payload decoder.
    pub fn with_decoder(decoder: D) -> Self {
        Self {
            buffer: Vec::new(),
            decoder,
            errors: Vec::new(),
        }
    }

    /// Append received bytes.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        trace!("Parser buffer now {} bytes", self.buffer.len());
    }

    /// Number of bytes waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether any protocol error was recorded since the last `take_errors`.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Drain recorded protocol errors.
    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    /// Give up on whatever is still buffered.
    ///
    /// Called when no more bytes will arrive for the current exchange. A
    /// leftover candidate means its end marker or checksum was lost or
    /// corrupted, so it is recorded as a protocol error. Returns whether
    /// anything was dropped.
    pub fn flush_incomplete(&mut self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        let len = self.buffer.len();
        let preview: String = self
            .buffer
            .iter()
            .take(16)
            .map(|&b| if (0x20..0x7F).contains(&b) { char::from(b) } else { '.' })
            .collect();
        self.buffer.clear();
        self.record(format!(
            "Incomplete or malformed frame: {len} bytes without a valid end marker ({preview})"
        ));
        true
    }

    /// Decode the next complete frame, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> Option<DecodedResponse> {
        let payload = self.next_payload()?;
        let command = &payload[..2];
        let data = &payload[2..];
        debug!("Frame received: command {command}, {} data chars", data.len());
        Some(self.decoder.decode(command, data, &payload))
    }

    fn record(&mut self, message: String) {
        warn!("{message}");
        self.errors.push(message);
    }

    fn next_payload(&mut self) -> Option<String> {
        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == STX) else {
                self.discard(self.buffer.len());
                return None;
            };
            if start > 0 {
                self.discard(start);
            }

            // Scan the candidate for its end marker.
            let mut end = None;
            let mut broken = None;
            for (i, &b) in self.buffer.iter().enumerate().skip(1) {
                match b {
                    ETX => {
                        end = Some(i);
                        break;
                    },
                    STX => {
                        broken = Some((i, "start marker inside frame".to_string()));
                        break;
                    },
                    b if !(0x20..0x7F).contains(&b) => {
                        broken = Some((i + 1, format!("unexpected byte 0x{b:02X} inside frame")));
                        break;
                    },
                    _ => {},
                }
            }

            if let Some((resume, reason)) = broken {
                self.record(format!("Dropped frame candidate: {reason}"));
                self.buffer.drain(..resume);
                continue;
            }

            let Some(end) = end else {
                if self.buffer.len() > MAX_FRAME_LEN {
                    let len = self.buffer.len();
                    self.record(format!("Dropped {len} bytes: no end marker within {MAX_FRAME_LEN} bytes"));
                    self.buffer.clear();
                }
                return None;
            };

            // Checksum byte not here yet.
            if self.buffer.len() < end + 2 {
                return None;
            }

            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let payload = &frame[1..end];
            let received = frame[end + 1];
            let expected = frame_lrc(payload, ETX);

            if received != expected {
                self.record(format!(
                    "LRC mismatch: expected 0x{expected:02X}, got 0x{received:02X}; frame dropped"
                ));
                continue;
            }

            if payload.len() < 2 {
                self.record(format!("Payload too short ({} bytes); frame dropped", payload.len()));
                continue;
            }

            // The scan above only lets printable ASCII through.
            return Some(payload.iter().map(|&b| char::from(b)).collect());
        }
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let dropped: Vec<u8> = self.buffer.drain(..count).collect();
        if dropped.contains(&ETX) {
            self.record(format!("Dropped {count} bytes containing an end marker without a start marker"));
        } else {
            warn!("Discarding {count} bytes of line noise before start marker");
        }
    }
}
