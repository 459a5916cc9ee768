//! Error types for keyinject.

use std::io;
use thiserror::Error;

/// Result type for keyinject operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for keyinject operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key material or slot configuration rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transport could not be acquired or opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No serial port found during auto-detection.
    #[error("No serial port found")]
    DeviceNotFound,

    /// Write or read exceeded its bound.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Checksum mismatch or malformed frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Terminal answered with a non-success response code.
    #[error("Device error {code}: {description}")]
    Device {
        /// Two-character response code as sent by the terminal.
        code: String,
        /// Human-readable description from the device error table.
        description: String,
    },

    /// A frame decoded fine but was not the reply we asked for.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Operation not allowed in the current injection state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Pre-flight rejection of key material or slot settings.
///
/// Every variant is raised before a single byte is placed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Key data is empty.
    #[error("key data is empty")]
    EmptyKeyData,

    /// Key data contains characters outside `[0-9A-Fa-f]`.
    #[error("key data is not valid hexadecimal")]
    NonHexKeyData,

    /// Key data has an odd number of hex digits.
    #[error("key data has odd length ({0} hex digits)")]
    OddLengthKeyData(usize),

    /// Key byte length is not allowed for the algorithm family.
    #[error("{length} bytes is not a valid {family} key length (allowed: {allowed:?})")]
    InvalidKeyLength {
        /// Byte length of the key.
        length: usize,
        /// Algorithm family the length was checked against.
        family: &'static str,
        /// Allowed byte lengths for that family.
        allowed: &'static [usize],
    },

    /// Check value is empty.
    #[error("check value is empty")]
    EmptyCheckValue,

    /// Check value is not hexadecimal.
    #[error("check value is not valid hexadecimal")]
    NonHexCheckValue,

    /// Check value is shorter than the 4 characters the command carries.
    #[error("check value must have at least 4 hex digits, got {0}")]
    CheckValueTooShort(usize),

    /// KSN is missing or not exactly 20 hex characters.
    #[error("KSN must be exactly 20 hex digits for DUKPT keys")]
    InvalidKsn,

    /// Slot is not a 2-digit hex value.
    #[error("key slot '{0}' is not a 2-digit hex value")]
    InvalidSlot(String),

    /// Referenced key is not in the key store.
    #[error("no stored key with check value '{0}'")]
    KeyNotFound(String),

    /// Computed key length field is not 3 alphanumeric characters.
    #[error("key length field '{0}' is malformed")]
    MalformedLengthField(String),

    /// A maintenance command field has the wrong shape.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl Error {
    /// Short category label used in injection logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Connection(_) | Self::DeviceNotFound => "connection",
            Self::Timeout(_) => "timeout",
            Self::Protocol(_) => "protocol",
            Self::Device { .. } => "device",
            Self::UnexpectedMessage(_) => "unexpected message",
            Self::InvalidState(_) => "state",
            Self::Io(_) => "io",
            #[cfg(feature = "native")]
            Self::Serial(_) => "serial",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_converts() {
        let err: Error = ValidationError::InvalidKsn.into();
        assert!(matches!(err, Error::Validation(ValidationError::InvalidKsn)));
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_device_error_display() {
        let err = Error::Device {
            code: "0C".to_string(),
            description: "Invalid key slot".to_string(),
        };
        assert_eq!(err.to_string(), "Device error 0C: Invalid key slot");
    }

    #[test]
    fn test_invalid_key_length_display() {
        let err = ValidationError::InvalidKeyLength {
            length: 20,
            family: "AES",
            allowed: &[16, 24, 32],
        };
        assert!(err.to_string().contains("20 bytes"));
        assert!(err.to_string().contains("AES"));
    }
}
