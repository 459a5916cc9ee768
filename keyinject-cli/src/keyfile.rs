//! Key file loading.
//!
//! A key file holds stored keys and the profiles that place them into slots:
//!
//! ```toml
//! [[key]]
//! check_value = "ABCD1234EF"
//! key_data_hex = "0123456789ABCDEFFEDCBA9876543210"
//! algorithm_family = "TDES"
//!
//! [[profile]]
//! name = "retail"
//!
//! [[profile.slot]]
//! usage = "PIN"
//! key_type = "PIN Encryption Key"
//! slot = "01"
//! selected_key_ref = "ABCD1234EF"
//! ```

use {
    crate::CliError,
    anyhow::{Context, Result},
    keyinject::{
        InjectionBatch, KeySlotConfig, MemoryKeyStore, MemoryProfileStore, ProfileStore,
        StoredKeyRecord,
    },
    log::debug,
    serde::Deserialize,
    std::{fs, path::Path},
};

/// One named profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEntry {
    /// Profile name.
    pub name: String,
    /// Ordered slots.
    #[serde(default)]
    pub slot: Vec<KeySlotConfig>,
}

/// Parsed key file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyFile {
    /// Stored keys.
    #[serde(default)]
    pub key: Vec<StoredKeyRecord>,
    /// Profiles.
    #[serde(default)]
    pub profile: Vec<ProfileEntry>,
}

impl KeyFile {
    /// Read and parse a key file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        let file = Self::parse(&content)
            .with_context(|| format!("Invalid key file {}", path.display()))?;
        debug!(
            "Loaded {} keys and {} profiles from {}",
            file.key.len(),
            file.profile.len(),
            path.display()
        );
        Ok(file)
    }

    /// Parse key file contents.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Keys as a lookup store.
    pub fn key_store(&self) -> MemoryKeyStore {
        self.key.iter().cloned().collect()
    }

    /// Profiles as a lookup store.
    pub fn profile_store(&self) -> MemoryProfileStore {
        let mut store = MemoryProfileStore::new();
        for entry in &self.profile {
            store.insert(entry.name.clone(), entry.slot.clone());
        }
        store
    }

    /// The batch for profile `name`. Unknown names are usage errors.
    pub fn batch(&self, name: &str) -> Result<InjectionBatch> {
        let store = self.profile_store();
        let Some(slots) = store.profile(name) else {
            let known = store.profile_names();
            let hint = if known.is_empty() {
                "the key file defines no profiles".to_string()
            } else {
                format!("known profiles: {}", known.join(", "))
            };
            return Err(CliError::Usage(format!("unknown profile '{name}' ({hint})")).into());
        };
        Ok(InjectionBatch::new(name, slots))
    }
}
