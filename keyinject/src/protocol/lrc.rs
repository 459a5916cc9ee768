//! Longitudinal redundancy check used as the frame checksum.

/// XOR every byte of `data` into a single checksum byte.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Checksum over a payload followed by the end marker, as carried on the wire.
pub fn frame_lrc(payload: &[u8], etx: u8) -> u8 {
    lrc(payload) ^ etx
}
