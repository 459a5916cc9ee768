//! Response classification.
//!
//! Only an explicit `"00"` on the expected reply type counts as success.
//! Everything else, including a frame that decoded to the wrong shape,
//! stops the batch.

use crate::{
    error::{Error, Result},
    protocol::futurex::{DecodedResponse, RESPONSE_OK, describe_response_code},
};

/// Result of classifying a terminal reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The terminal confirmed the command.
    Success {
        /// Key checksum echoed by the terminal (empty for maintenance replies).
        key_checksum: String,
        /// Extra data carried by the reply (serial number, trailer).
        data: String,
    },
    /// The terminal rejected the command.
    DeviceError {
        /// Response code as received.
        code: String,
        /// Description from the device error table.
        description: String,
    },
    /// The reply was not of the expected type.
    UnexpectedMessage {
        /// Raw payload for diagnostics.
        raw_payload: String,
    },
}

impl Outcome {
    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Turn non-success outcomes into errors.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Success { .. } => Ok(self),
            Self::DeviceError { code, description } => Err(Error::Device { code, description }),
            Self::UnexpectedMessage { raw_payload } => Err(Error::UnexpectedMessage(raw_payload)),
        }
    }
}

fn from_code(code: &str, key_checksum: &str, data: &str) -> Outcome {
    if code == RESPONSE_OK {
        Outcome::Success {
            key_checksum: key_checksum.to_string(),
            data: data.to_string(),
        }
    } else {
        Outcome::DeviceError {
            code: code.to_string(),
            description: describe_response_code(code),
        }
    }
}

/// Classify a reply to an inject-symmetric-key command.
pub fn classify(decoded: &DecodedResponse) -> Outcome {
    match decoded {
        DecodedResponse::InjectKey(r) => from_code(&r.response_code, &r.key_checksum, &r.trailer),
        other => Outcome::UnexpectedMessage {
            raw_payload: other.raw_payload().to_string(),
        },
    }
}

/// Classify a reply to maintenance command `command`.
pub fn classify_command(decoded: &DecodedResponse, command: &str) -> Outcome {
    match decoded {
        DecodedResponse::Command(r) if r.command == command => {
            from_code(&r.response_code, "", &r.data)
        },
        other => Outcome::UnexpectedMessage {
            raw_payload: other.raw_payload().to_string(),
        },
    }
}
