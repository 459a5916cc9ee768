//! Key material model and pre-flight integrity checks.

use {
    crate::error::ValidationError,
    std::fmt,
};

/// Length of a DUKPT key serial number, in hex digits.
pub const KSN_LEN: usize = 20;

/// What a slot is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum KeyUsage {
    /// PIN encryption.
    Pin,
    /// Message authentication.
    Mac,
    /// Data encryption.
    Data,
    /// Key transport key.
    Ktk,
    /// DUKPT-derived key.
    Dukpt,
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pin => "PIN",
            Self::Mac => "MAC",
            Self::Data => "DATA",
            Self::Ktk => "KTK",
            Self::Dukpt => "DUKPT",
        })
    }
}

/// Cipher family of a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum AlgorithmFamily {
    /// Triple DES.
    #[default]
    Tdes,
    /// AES.
    Aes,
    /// DUKPT (TDES-based derivation).
    Dukpt,
}

impl AlgorithmFamily {
    /// Infer the family from a human key-type label.
    ///
    /// Anything that does not mention AES or DUKPT falls back to TDES,
    /// whose length set is shared with DUKPT.
    pub fn from_key_type(key_type: &str) -> Self {
        let upper = key_type.to_ascii_uppercase();
        if upper.contains("AES") {
            Self::Aes
        } else if upper.contains("DUKPT") {
            Self::Dukpt
        } else {
            Self::Tdes
        }
    }

    /// Allowed key lengths in bytes.
    pub fn allowed_lengths(self) -> &'static [usize] {
        match self {
            Self::Aes => &[16, 24, 32],
            Self::Tdes | Self::Dukpt => &[16, 32, 48],
        }
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Tdes => "TDES",
            Self::Aes => "AES",
            Self::Dukpt => "DUKPT",
        }
    }
}

/// One entry of an injection profile: which key goes into which slot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeySlotConfig {
    /// Slot usage tag.
    pub usage: KeyUsage,
    /// Human key-type label, e.g. "PIN Encryption Key".
    pub key_type: String,
    /// Slot index as 2 hex digits.
    pub slot: String,
    /// Check value of the stored key to load.
    pub selected_key_ref: String,
    /// Key serial number, required for DUKPT key types.
    #[cfg_attr(feature = "serde", serde(default))]
    pub ksn: Option<String>,
}

impl KeySlotConfig {
    /// Create a slot entry without a KSN.
    pub fn new(
        usage: KeyUsage,
        key_type: impl Into<String>,
        slot: impl Into<String>,
        selected_key_ref: impl Into<String>,
    ) -> Self {
        Self {
            usage,
            key_type: key_type.into(),
            slot: slot.into(),
            selected_key_ref: selected_key_ref.into(),
            ksn: None,
        }
    }

    /// Attach a KSN.
    #[must_use]
    pub fn with_ksn(mut self, ksn: impl Into<String>) -> Self {
        self.ksn = Some(ksn.into());
        self
    }

    /// Whether the key type label denotes a DUKPT key.
    pub fn is_dukpt(&self) -> bool {
        self.key_type
            .to_ascii_uppercase()
            .contains("DUKPT")
    }
}

/// Key material as held by the key store.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoredKeyRecord {
    /// Hex check value (KCV).
    pub check_value: String,
    /// Full key material, hex-encoded.
    pub key_data_hex: String,
    /// Cipher family tag.
    #[cfg_attr(feature = "serde", serde(default))]
    pub algorithm_family: AlgorithmFamily,
}

impl StoredKeyRecord {
    /// Create a record.
    pub fn new(
        check_value: impl Into<String>,
        key_data_hex: impl Into<String>,
        algorithm_family: AlgorithmFamily,
    ) -> Self {
        Self {
            check_value: check_value.into(),
            key_data_hex: key_data_hex.into(),
            algorithm_family,
        }
    }

    /// Key length in bytes (hex digits / 2).
    pub fn byte_len(&self) -> usize {
        self.key_data_hex.len() / 2
    }
}

// Key material never goes to logs in full.
impl fmt::Debug for StoredKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKeyRecord")
            .field("check_value", &self.check_value)
            .field("key_data_hex", &mask_key(&self.key_data_hex))
            .field("algorithm_family", &self.algorithm_family)
            .finish()
    }
}

/// An ordered list of slot configurations bound to one profile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InjectionBatch {
    /// Profile name, for logs.
    pub profile: String,
    /// Steps, processed strictly in order.
    pub steps: Vec<KeySlotConfig>,
}

impl InjectionBatch {
    /// Create a batch.
    pub fn new(profile: impl Into<String>, steps: Vec<KeySlotConfig>) -> Self {
        Self {
            profile: profile.into(),
            steps,
        }
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there is nothing to inject.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Shorten key hex to its first and last 4 digits for display.
pub fn mask_key(key_hex: &str) -> String {
    if key_hex.len() <= 8 || !key_hex.is_ascii() {
        return "*".repeat(key_hex.len().min(8));
    }
    format!("{}...{}", &key_hex[..4], &key_hex[key_hex.len() - 4..])
}

pub(crate) fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Check key material and slot settings before anything is built.
///
/// Checks run in a fixed order and the first failure is returned:
/// key data present, hexadecimal, whole bytes, length allowed for the
/// family named by `config.key_type`, check value present and hexadecimal,
/// and finally a 20-digit KSN when the key type is DUKPT.
pub fn validate(record: &StoredKeyRecord, config: &KeySlotConfig) -> Result<(), ValidationError> {
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

    let family = AlgorithmFamily::from_key_type(&config.key_type);
    let length = record.byte_len();
    if !family
        .allowed_lengths()
        .contains(&length)
    {
        return Err(ValidationError::InvalidKeyLength {
            length,
            family: family.name(),
            allowed: family.allowed_lengths(),
        });
    }

    if record.check_value.is_empty() {
        return Err(ValidationError::EmptyCheckValue);
    }
    if !is_hex(&record.check_value) {
        return Err(ValidationError::NonHexCheckValue);
    }

    if config.is_dukpt() {
        match config.ksn.as_deref() {
            Some(ksn) if ksn.len() == KSN_LEN && is_hex(ksn) => {},
            _ => return Err(ValidationError::InvalidKsn),
        }
    }

    Ok(())
}
