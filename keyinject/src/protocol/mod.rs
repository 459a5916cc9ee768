//! Protocol implementations.

pub mod command;
pub mod frame;
pub mod futurex;
pub mod lrc;

// Re-export common types
pub use {
    command::{
        CommandPayload, DeviceBrand, build_inject_key, key_length_field, key_type_code,
    },
    frame::{ETX, FrameParser, STX, encode},
    futurex::{
        CommandResponse, DecodedResponse, FuturexDecoder, InjectKeyResponse, RawMessage,
        ResponseDecoder, describe_response_code, device_error_description,
    },
};
