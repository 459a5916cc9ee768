//! Futurex command payloads.
//!
//! ## Inject symmetric key (`02`)
//!
//! ```text
//! +-----+-----+------+-----+------+-----+------+------+-----+-----+----------+
//! | cmd | ver | slot | ktk | type | enc | kcv  | kkcv | KSN | len | key data |
//! +-----+-----+------+-----+------+-----+------+------+-----+-----+----------+
//! |  2  |  2  |  2   |  2  |  2   |  2  |  4   |  4   | 20  |  3  | 2 x len  |
//! +-----+-----+------+-----+------+-----+------+------+-----+-----+----------+
//! ```
//!
//! Only clear loading is implemented, so the transport-key slot, encryption
//! mode and transport-key checksum are fixed zero values.
//!
//! ## Validate device brand (`08`)
//!
//! `08` `AA` `<brand code 2>`. The terminal answers `00` when it is of the
//! expected brand and `2A` followed by its own brand code otherwise.

use {
    crate::{
        error::ValidationError,
        key::{KSN_LEN, KeySlotConfig, StoredKeyRecord, is_hex},
        protocol::{
            frame,
            futurex::{
                CMD_DELETE_ALL_KEYS, CMD_DELETE_KEY, CMD_INJECT_KEY, CMD_READ_SERIAL,
                CMD_VALIDATE_BRAND, CMD_WRITE_SERIAL,
            },
        },
    },
    log::debug,
    std::{fmt, str::FromStr},
};

/// Command version sent with every command.
pub const COMMAND_VERSION: &str = "01";

/// Transport-key slot for clear loads.
const CLEAR_KTK_SLOT: &str = "00";

/// Encryption mode for clear loads.
const CLEAR_ENCRYPTION_MODE: &str = "00";

/// Transport-key checksum placeholder for clear loads.
const CLEAR_KTK_CHECKSUM: &str = "0000";

/// Number of check-value characters carried in the command.
const KEY_CHECKSUM_LEN: usize = 4;

/// Width of the serial number field for command `04`.
pub const SERIAL_NUMBER_LEN: usize = 16;

/// Version field of the brand check (`08`).
pub const BRAND_CHECK_VERSION: &str = "AA";

/// Terminal manufacturer as identified by the brand check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum DeviceBrand {
    /// Aisino / Vanstone.
    Aisino,
    /// NEWPOS.
    Newpos,
    /// Urovo.
    Urovo,
    /// Anything else.
    Unknown,
}

impl DeviceBrand {
    /// Two-character brand code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Aisino => "00",
            Self::Newpos => "01",
            Self::Urovo => "02",
            Self::Unknown => "FF",
        }
    }

    /// Brand for a code reported by the terminal (case-insensitive).
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "00" => Self::Aisino,
            "01" => Self::Newpos,
            "02" => Self::Urovo,
            _ => Self::Unknown,
        }
    }

    /// Upper-case brand name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Aisino => "AISINO",
            Self::Newpos => "NEWPOS",
            Self::Urovo => "UROVO",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DeviceBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceBrand {
    type Err = ValidationError;

    /// Accepts a brand name or its two-character code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "AISINO" | "VANSTONE" | "00" => Ok(Self::Aisino),
            "NEWPOS" | "01" => Ok(Self::Newpos),
            "UROVO" | "02" => Ok(Self::Urovo),
            _ => Err(ValidationError::InvalidField {
                field: "device brand",
                reason: format!("expected AISINO, NEWPOS or UROVO, got '{s}'"),
            }),
        }
    }
}

/// A command code plus its ordered ASCII fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPayload {
    /// Two-character command code.
    pub code: &'static str,
    /// Fields in wire order, without delimiters.
    pub fields: Vec<String>,
}

impl CommandPayload {
    fn new(code: &'static str, fields: Vec<String>) -> Self {
        Self { code, fields }
    }

    /// The ASCII payload: command code followed by every field.
    pub fn payload(&self) -> String {
        let mut payload = String::from(self.code);
        for field in &self.fields {
            payload.push_str(field);
        }
        payload
    }

    /// Full wire frame.
    pub fn encode(&self) -> Vec<u8> {
        frame::encode(self.code, &self.fields)
    }
}

/// Futurex key-type code for a human key-type label.
///
/// Matching is by substring, first hit wins: PIN, MAC, DATA, DUKPT, then
/// TDES/3DES. Unrecognized labels load as a generic TDES key.
pub fn key_type_code(key_type: &str) -> &'static str {
    let upper = key_type.to_ascii_uppercase();
    if upper.contains("PIN") {
        "05"
    } else if upper.contains("MAC") {
        "04"
    } else if upper.contains("DATA") {
        "0C"
    } else if upper.contains("DUKPT") {
        "08"
    } else {
        // TDES, 3DES and anything else.
        "01"
    }
}

/// Three-character ASCII-hex byte count, e.g. 16 -> `"010"`.
pub fn key_length_field(byte_len: usize) -> Result<String, ValidationError> {
    let field = format!("{byte_len:03X}");
    if field.len() != 3 || !field.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ValidationError::MalformedLengthField(field));
    }
    Ok(field)
}

fn slot_field(slot: &str) -> Result<String, ValidationError> {
    if slot.len() == 2 && is_hex(slot) {
        Ok(slot.to_ascii_uppercase())
    } else {
        Err(ValidationError::InvalidSlot(slot.to_string()))
    }
}

/// Build the inject-symmetric-key command for one slot.
///
/// Either the whole command is returned or a [`ValidationError`]; partial
/// commands are never produced.
pub fn build_inject_key(
    config: &KeySlotConfig,
    record: &StoredKeyRecord,
) -> Result<CommandPayload, ValidationError> {
    let slot = slot_field(&config.slot)?;

    let check_value = &record.check_value;
    if check_value.is_empty() {
        return Err(ValidationError::EmptyCheckValue);
    }
    if !is_hex(check_value) {
        return Err(ValidationError::NonHexCheckValue);
    }
    let Some(key_checksum) = check_value.get(..KEY_CHECKSUM_LEN) else {
        return Err(ValidationError::CheckValueTooShort(check_value.len()));
    };

    let ksn = match config.ksn.as_deref() {
        Some(ksn) if ksn.len() == KSN_LEN && is_hex(ksn) => ksn.to_string(),
        Some(_) => return Err(ValidationError::InvalidKsn),
        None => "0".repeat(KSN_LEN),
    };

    let key = &record.key_data_hex;
    if key.is_empty() {
        return Err(ValidationError::EmptyKeyData);
    }
    if !is_hex(key) {
        return Err(ValidationError::NonHexKeyData);
    }
    if key.len() % 2 != 0 {
        return Err(ValidationError::OddLengthKeyData(key.len()));
    }
    let length = key_length_field(key.len() / 2)?;

    let type_code = key_type_code(&config.key_type);
    debug!(
        "Building inject command: slot {slot}, type {type_code} ({}), kcv {key_checksum}, length {length}",
        config.key_type
    );

    Ok(CommandPayload::new(
        CMD_INJECT_KEY,
        vec![
            COMMAND_VERSION.to_string(),
            slot,
            CLEAR_KTK_SLOT.to_string(),
            type_code.to_string(),
            CLEAR_ENCRYPTION_MODE.to_string(),
            key_checksum.to_string(),
            CLEAR_KTK_CHECKSUM.to_string(),
            ksn,
            length,
            key.clone(),
        ],
    ))
}

/// Read the terminal serial number (`03`).
pub fn read_serial() -> CommandPayload {
    CommandPayload::new(CMD_READ_SERIAL, vec![COMMAND_VERSION.to_string()])
}

/// Write the terminal serial number (`04`).
pub fn write_serial(serial: &str) -> Result<CommandPayload, ValidationError> {
    if serial.len() != SERIAL_NUMBER_LEN
        || !serial
            .bytes()
            .all(|b| b.is_ascii_alphanumeric())
    {
        return Err(ValidationError::InvalidField {
            field: "serial number",
            reason: format!("expected {SERIAL_NUMBER_LEN} alphanumeric characters, got '{serial}'"),
        });
    }
    Ok(CommandPayload::new(
        CMD_WRITE_SERIAL,
        vec![COMMAND_VERSION.to_string(), serial.to_string()],
    ))
}

/// Erase every key in the terminal (`05`).
pub fn delete_all_keys() -> CommandPayload {
    CommandPayload::new(CMD_DELETE_ALL_KEYS, vec![COMMAND_VERSION.to_string()])
}

/// Erase the key in one slot (`06`).
pub fn delete_key(slot: &str, key_type: &str) -> Result<CommandPayload, ValidationError> {
    Ok(CommandPayload::new(
        CMD_DELETE_KEY,
        vec![
            COMMAND_VERSION.to_string(),
            slot_field(slot)?,
            key_type_code(key_type).to_string(),
        ],
    ))
}

/// Ask the terminal to confirm it is of brand `expected` (`08`).
pub fn validate_brand(expected: DeviceBrand) -> CommandPayload {
    CommandPayload::new(
        CMD_VALIDATE_BRAND,
        vec![BRAND_CHECK_VERSION.to_string(), expected.code().to_string()],
    )
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            key::{AlgorithmFamily, KeyUsage},
            protocol::{frame::{ETX, STX}, lrc::lrc},
        },
    };

    const KEY_32: &str = "0123456789ABCDEFFEDCBA9876543210";

    fn pin_config() -> KeySlotConfig {
        KeySlotConfig::new(KeyUsage::Pin, "PIN Encryption Key", "01", "ABCD1234EF")
    }

    fn pin_record() -> StoredKeyRecord {
        StoredKeyRecord::new("ABCD1234EF", KEY_32, AlgorithmFamily::Tdes)
    }

    #[test]
    fn test_pin_key_fields() {
        let cmd = build_inject_key(&pin_config(), &pin_record()).unwrap();
        assert_eq!(cmd.code, "02");
        assert_eq!(
            cmd.fields,
            vec![
                "01",
                "01",
                "00",
                "05",
                "00",
                "ABCD",
                "0000",
                "00000000000000000000",
                "010",
                KEY_32,
            ]
        );
    }

    #[test]
    fn test_pin_key_frame_bytes() {
        let cmd = build_inject_key(&pin_config(), &pin_record()).unwrap();
        let payload = format!("02{}", cmd.fields.concat());
        let frame = cmd.encode();

        assert_eq!(frame[0], STX);
        assert_eq!(&frame[1..frame.len() - 2], payload.as_bytes());
        assert_eq!(frame[frame.len() - 2], ETX);
        assert_eq!(frame[frame.len() - 1], lrc(payload.as_bytes()) ^ ETX);
        assert_eq!(cmd.payload(), payload);
    }

    #[test]
    fn test_key_length_field_mapping() {
        assert_eq!(key_length_field(16).unwrap(), "010");
        assert_eq!(key_length_field(24).unwrap(), "018");
        assert_eq!(key_length_field(32).unwrap(), "020");
        assert_eq!(key_length_field(48).unwrap(), "030");
        assert!(key_length_field(0x1000).is_err());
    }

    #[test]
    fn test_key_type_mapping() {
        assert_eq!(key_type_code("PIN Encryption Key"), "05");
        assert_eq!(key_type_code("MAC Key"), "04");
        assert_eq!(key_type_code("TDES Master"), "01");
        assert_eq!(key_type_code("3DES"), "01");
        assert_eq!(key_type_code("DUKPT BDK"), "08");
        assert_eq!(key_type_code("Data Encryption"), "0C");
        assert_eq!(key_type_code("something else"), "01");
    }

    #[test]
    fn test_dukpt_ksn_is_carried() {
        let config = KeySlotConfig::new(KeyUsage::Dukpt, "DUKPT IPEK", "0a", "ABCD")
            .with_ksn("FFFF9876543210E00000");
        let cmd = build_inject_key(&config, &pin_record()).unwrap();
        assert_eq!(cmd.fields[1], "0A");
        assert_eq!(cmd.fields[3], "08");
        assert_eq!(cmd.fields[7], "FFFF9876543210E00000");
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let mut config = pin_config();
        config.slot = "1".to_string();
        assert_eq!(
            build_inject_key(&config, &pin_record()),
            Err(ValidationError::InvalidSlot("1".to_string()))
        );
        config.slot = "G1".to_string();
        assert!(build_inject_key(&config, &pin_record()).is_err());
    }

    #[test]
    fn test_short_check_value_rejected() {
        let mut record = pin_record();
        record.check_value = "ABC".to_string();
        assert_eq!(
            build_inject_key(&pin_config(), &record),
            Err(ValidationError::CheckValueTooShort(3))
        );
    }

    #[test]
    fn test_bad_ksn_rejected() {
        let config = pin_config().with_ksn("1234");
        assert_eq!(
            build_inject_key(&config, &pin_record()),
            Err(ValidationError::InvalidKsn)
        );
    }

    #[test]
    fn test_maintenance_commands() {
        assert_eq!(read_serial().payload(), "0301");
        assert_eq!(delete_all_keys().payload(), "0501");
        assert_eq!(
            write_serial("ABCDEF0123456789").unwrap().payload(),
            "0401ABCDEF0123456789"
        );
        assert!(write_serial("SHORT").is_err());
        assert_eq!(delete_key("0c", "MAC Key").unwrap().payload(), "06010C04");
        assert!(delete_key("100", "MAC").is_err());
    }

    #[test]
    fn test_validate_brand_payload() {
        assert_eq!(validate_brand(DeviceBrand::Newpos).payload(), "08AA01");
        assert_eq!(validate_brand(DeviceBrand::Aisino).payload(), "08AA00");
        assert_eq!(validate_brand(DeviceBrand::Unknown).payload(), "08AAFF");
    }

    #[test]
    fn test_device_brand_parsing() {
        assert_eq!("newpos".parse::<DeviceBrand>().unwrap(), DeviceBrand::Newpos);
        assert_eq!("Vanstone".parse::<DeviceBrand>().unwrap(), DeviceBrand::Aisino);
        assert_eq!("02".parse::<DeviceBrand>().unwrap(), DeviceBrand::Urovo);
        assert!("verifone".parse::<DeviceBrand>().is_err());
        assert_eq!(DeviceBrand::from_code("01"), DeviceBrand::Newpos);
        assert_eq!(DeviceBrand::from_code("7F"), DeviceBrand::Unknown);
        assert_eq!(DeviceBrand::Urovo.to_string(), "UROVO");
    }
}
