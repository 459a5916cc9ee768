//! Collaborators the engine reads from but does not own.

use {
    crate::key::{KeySlotConfig, StoredKeyRecord},
    std::collections::HashMap,
};

/// Source of key material.
pub trait KeyStore {
    /// Find a stored key by its check value.
    fn lookup_by_check_value(&self, check_value: &str) -> Option<StoredKeyRecord>;
}

/// Source of injection profiles.
pub trait ProfileStore {
    /// Ordered slot configurations of a profile, or `None` if unknown.
    fn profile(&self, name: &str) -> Option<Vec<KeySlotConfig>>;

    /// Names of every known profile.
    fn profile_names(&self) -> Vec<String>;
}

/// Control surface of a background consumer of the serial port.
pub trait PollerControl {
    /// Whether the poller currently holds the port.
    fn is_active(&self) -> bool;

    /// Ask the poller to stop and release the port.
    fn stop(&self);

    /// Start the poller again.
    fn restart(&self);
}

/// Poller stand-in for setups with no background consumer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPoller;

impl PollerControl for NoPoller {
    fn is_active(&self) -> bool {
        false
    }

    fn stop(&self) {}

    fn restart(&self) {}
}

/// Key store backed by a map keyed on check value.
///
/// Lookups ignore ASCII case, as check values are hex.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    keys: HashMap<String, StoredKeyRecord>,
}

impl MemoryKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a key.
    pub fn insert(&mut self, record: StoredKeyRecord) {
        self.keys
            .insert(record.check_value.to_ascii_uppercase(), record);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<StoredKeyRecord> for MemoryKeyStore {
    fn from_iter<I: IntoIterator<Item = StoredKeyRecord>>(iter: I) -> Self {
        let mut store = Self::new();
        for record in iter {
            store.insert(record);
        }
        store
    }
}

impl KeyStore for MemoryKeyStore {
    fn lookup_by_check_value(&self, check_value: &str) -> Option<StoredKeyRecord> {
        self.keys
            .get(&check_value.to_ascii_uppercase())
            .cloned()
    }
}

/// Profile store backed by an ordered list of named profiles.
#[derive(Debug, Clone, Default)]
pub struct MemoryProfileStore {
    profiles: Vec<(String, Vec<KeySlotConfig>)>,
}

impl MemoryProfileStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, name: impl Into<String>, slots: Vec<KeySlotConfig>) {
        let name = name.into();
        if let Some(entry) = self
            .profiles
            .iter_mut()
            .find(|(n, _)| *n == name)
        {
            entry.1 = slots;
        } else {
            self.profiles.push((name, slots));
        }
    }
}

impl ProfileStore for MemoryProfileStore {
    fn profile(&self, name: &str) -> Option<Vec<KeySlotConfig>> {
        self.profiles
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slots)| slots.clone())
    }

    fn profile_names(&self) -> Vec<String> {
        self.profiles
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }
}

impl<T: KeyStore + ?Sized> KeyStore for &T {
    fn lookup_by_check_value(&self, check_value: &str) -> Option<StoredKeyRecord> {
        (**self).lookup_by_check_value(check_value)
    }
}

impl<T: PollerControl + ?Sized> PollerControl for &T {
    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn stop(&self) {
        (**self).stop();
    }

    fn restart(&self) {
        (**self).restart();
    }
}
