//! Futurex payload decoding and device response codes.
//!
//! Once the framer has stripped STX/ETX/LRC, a payload is plain ASCII:
//!
//! ```text
//! +---------+---------------+--------------+--------------------------+
//! | command | response code | key checksum |   trailer (optional)     |
//! +---------+---------------+--------------+--------------------------+
//! |    2    |       2       |      4       | serial (16) + model (..) |
//! +---------+---------------+--------------+--------------------------+
//! ```
//!
//! The checksum column only exists for command `02`. Maintenance commands
//! (`03`..`06`) and the brand check (`08`) answer with
//! `<command><response code><data>`.

use log::debug;

/// Command code for "inject symmetric key".
pub const CMD_INJECT_KEY: &str = "02";
/// Command code for "read serial number".
pub const CMD_READ_SERIAL: &str = "03";
/// Command code for "write serial number".
pub const CMD_WRITE_SERIAL: &str = "04";
/// Command code for "delete all keys".
pub const CMD_DELETE_ALL_KEYS: &str = "05";
/// Command code for "delete a single key".
pub const CMD_DELETE_KEY: &str = "06";
/// Command code for "validate device brand".
pub const CMD_VALIDATE_BRAND: &str = "08";

/// Response code meaning the command completed.
pub const RESPONSE_OK: &str = "00";

/// Response code for a brand check that found another manufacturer.
pub const RESPONSE_BRAND_MISMATCH: &str = "2A";

/// Longest `02` payload still treated as a reply. Anything longer is an
/// inject command echoed back on the line.
const MAX_INJECT_RESPONSE_LEN: usize = 60;

/// Longest `08` payload still treated as a reply.
const MAX_BRAND_RESPONSE_LEN: usize = 20;

/// Width of the device serial that may follow the key checksum.
const DEVICE_SERIAL_LEN: usize = 16;

/// Reply to an inject-symmetric-key command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectKeyResponse {
    /// Two hex characters, `"00"` on success.
    pub response_code: String,
    /// Four hex characters echoing the key checksum.
    pub key_checksum: String,
    /// Everything after the checksum, preserved verbatim.
    pub trailer: String,
    /// Full payload including the command code.
    pub raw_payload: String,
}

impl InjectKeyResponse {
    /// Device serial number reported in the trailer, if present.
    pub fn device_serial(&self) -> Option<&str> {
        self.trailer
            .get(..DEVICE_SERIAL_LEN)
            .filter(|s| !s.trim().is_empty())
    }

    /// Device model reported after the serial, if present.
    pub fn device_model(&self) -> Option<&str> {
        self.trailer
            .get(DEVICE_SERIAL_LEN..)
            .filter(|s| !s.is_empty())
    }
}

/// Reply to one of the maintenance commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Command code the reply belongs to.
    pub command: String,
    /// Two hex characters, `"00"` on success.
    pub response_code: String,
    /// Data after the response code (e.g. the serial number for `03`).
    pub data: String,
    /// Full payload including the command code.
    pub raw_payload: String,
}

/// A payload that did not match any known reply shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Full payload including the command code.
    pub raw_payload: String,
}

/// Typed view of a decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedResponse {
    /// Inject-symmetric-key reply.
    InjectKey(InjectKeyResponse),
    /// Maintenance command reply.
    Command(CommandResponse),
    /// Anything unrecognized.
    Raw(RawMessage),
}

impl DecodedResponse {
    /// Full payload text, whatever the variant.
    pub fn raw_payload(&self) -> &str {
        match self {
            Self::InjectKey(r) => &r.raw_payload,
            Self::Command(r) => &r.raw_payload,
            Self::Raw(r) => &r.raw_payload,
        }
    }
}

/// Turns a checked payload into a typed response.
///
/// The framer owns checksum validation; a decoder only ever sees payloads
/// that arrived intact.
pub trait ResponseDecoder {
    /// Decode a payload. `command` is the 2-character prefix and `data`
    /// is the remainder.
    fn decode(&self, command: &str, data: &str, raw_payload: &str) -> DecodedResponse;
}

/// Decoder for Futurex-format replies.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuturexDecoder;

impl ResponseDecoder for FuturexDecoder {
    fn decode(&self, command: &str, data: &str, raw_payload: &str) -> DecodedResponse {
        let raw = || {
            DecodedResponse::Raw(RawMessage {
                raw_payload: raw_payload.to_string(),
            })
        };

        match command {
            CMD_INJECT_KEY => {
                if raw_payload.len() > MAX_INJECT_RESPONSE_LEN {
                    debug!("Payload of {} chars looks like an echoed command", raw_payload.len());
                    return raw();
                }
                let (Some(code), Some(checksum)) = (data.get(..2), data.get(2..6)) else {
                    return raw();
                };
                if !is_hex(code) || !is_hex(checksum) {
                    return raw();
                }
                DecodedResponse::InjectKey(InjectKeyResponse {
                    response_code: code.to_ascii_uppercase(),
                    key_checksum: checksum.to_string(),
                    trailer: data[6..].to_string(),
                    raw_payload: raw_payload.to_string(),
                })
            },
            CMD_READ_SERIAL | CMD_WRITE_SERIAL | CMD_DELETE_ALL_KEYS | CMD_DELETE_KEY => {
                match data.get(..2) {
                    Some(code) if is_hex(code) => DecodedResponse::Command(CommandResponse {
                        command: command.to_string(),
                        response_code: code.to_ascii_uppercase(),
                        data: data[2..].to_string(),
                        raw_payload: raw_payload.to_string(),
                    }),
                    _ => raw(),
                }
            },
            CMD_VALIDATE_BRAND => match data.get(..2) {
                Some(code)
                    if raw_payload.len() <= MAX_BRAND_RESPONSE_LEN
                        && device_error_description(code).is_some() =>
                {
                    DecodedResponse::Command(CommandResponse {
                        command: command.to_string(),
                        response_code: code.to_ascii_uppercase(),
                        data: data[2..].to_string(),
                        raw_payload: raw_payload.to_string(),
                    })
                },
                _ => raw(),
            },
            _ => raw(),
        }
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Device response codes, as documented for Futurex-compatible firmware.
const DEVICE_ERRORS: &[(&str, &str)] = &[
    ("00", "Successful"),
    ("01", "Invalid command"),
    ("02", "Invalid command version"),
    ("03", "Invalid length"),
    ("04", "Unsupported characters"),
    ("05", "Device is busy"),
    ("06", "Not in injection mode"),
    ("07", "Device is in tamper"),
    ("08", "Bad LRC"),
    ("09", "Duplicate key"),
    ("0A", "Duplicate KSN"),
    ("0B", "Key deletion failed"),
    ("0C", "Invalid key slot"),
    ("0D", "Invalid KTK slot"),
    ("0E", "Missing KTK"),
    ("0F", "Key slot not empty"),
    ("10", "Invalid key type"),
    ("11", "Invalid key encryption type"),
    ("12", "Invalid key checksum"),
    ("13", "Invalid KTK checksum"),
    ("14", "Invalid KSN"),
    ("15", "Invalid key length"),
    ("16", "Invalid KTK length"),
    ("17", "Invalid TR-31 version"),
    ("18", "Invalid key usage"),
    ("19", "Invalid algorithm"),
    ("1A", "Invalid mode of use"),
    ("1B", "MAC verification failed"),
    ("1C", "Decryption failed"),
    ("2A", "Device brand mismatch"),
];

/// Look up a response code in the device error table (case-insensitive).
pub fn device_error_description(code: &str) -> Option<&'static str> {
    DEVICE_ERRORS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, description)| *description)
}

/// Description for any response code, falling back to `unknown code <x>`.
pub fn describe_response_code(code: &str) -> String {
    device_error_description(code).map_or_else(|| format!("unknown code {code}"), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(payload: &str) -> DecodedResponse {
        FuturexDecoder.decode(&payload[..2], &payload[2..], payload)
    }

    #[test]
    fn test_decode_inject_success() {
        let DecodedResponse::InjectKey(r) = decode("0200ABCD") else {
            panic!("expected inject response");
        };
        assert_eq!(r.response_code, "00");
        assert_eq!(r.key_checksum, "ABCD");
        assert!(r.trailer.is_empty());
        assert_eq!(r.device_serial(), None);
    }

    #[test]
    fn test_decode_inject_with_trailer() {
        let DecodedResponse::InjectKey(r) = decode("020cABCD0000123456789012N910") else {
            panic!("expected inject response");
        };
        assert_eq!(r.response_code, "0C");
        assert_eq!(r.device_serial(), Some("0000123456789012"));
        assert_eq!(r.device_model(), Some("N910"));
    }

    #[test]
    fn test_decode_inject_too_short_is_raw() {
        assert!(matches!(decode("0200AB"), DecodedResponse::Raw(_)));
    }

    #[test]
    fn test_decode_echoed_command_is_raw() {
        let payload = format!("020101000500ABCD0000{}010{}", "0".repeat(20), "1".repeat(32));
        assert!(matches!(decode(&payload), DecodedResponse::Raw(_)));
    }

    #[test]
    fn test_decode_read_serial_reply() {
        let DecodedResponse::Command(r) = decode("0300SN0000000000042") else {
            panic!("expected command response");
        };
        assert_eq!(r.command, "03");
        assert_eq!(r.response_code, "00");
        assert_eq!(r.data, "SN0000000000042");
    }

    #[test]
    fn test_decode_brand_check_replies() {
        let DecodedResponse::Command(ok) = decode("080001") else {
            panic!("expected command response");
        };
        assert_eq!(ok.command, "08");
        assert_eq!(ok.response_code, "00");
        assert_eq!(ok.data, "01");

        let DecodedResponse::Command(mismatch) = decode("082a02") else {
            panic!("expected command response");
        };
        assert_eq!(mismatch.response_code, RESPONSE_BRAND_MISMATCH);
        assert_eq!(mismatch.data, "02");
    }

    #[test]
    fn test_decode_brand_check_command_is_raw() {
        // The outgoing command carries version "AA", not a response code.
        assert!(matches!(decode("08AA01"), DecodedResponse::Raw(_)));
        let long = format!("0800{}", "0".repeat(20));
        assert!(matches!(decode(&long), DecodedResponse::Raw(_)));
    }

    #[test]
    fn test_decode_unknown_command_is_raw() {
        let decoded = decode("9900");
        assert_eq!(decoded.raw_payload(), "9900");
        assert!(matches!(decoded, DecodedResponse::Raw(_)));
    }

    #[test]
    fn test_device_error_lookup_case_insensitive() {
        assert_eq!(device_error_description("0c"), Some("Invalid key slot"));
        assert_eq!(device_error_description("0C"), Some("Invalid key slot"));
        assert_eq!(device_error_description("1b"), Some("MAC verification failed"));
        assert_eq!(device_error_description("FF"), None);
    }

    #[test]
    fn test_describe_unknown_code() {
        assert_eq!(describe_response_code("7E"), "unknown code 7E");
        assert_eq!(describe_response_code("05"), "Device is busy");
    }
}
