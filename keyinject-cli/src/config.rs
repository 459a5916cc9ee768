//! Configuration file support for keyinject.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (KEYINJECT_*)
//! 3. Local config file (./keyinject.toml)
//! 4. Global config file (~/.config/keyinject/config.toml)

use {
    directories::ProjectDirs,
    keyinject::InjectionTiming,
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "keyinject.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Extra USB devices treated as terminal links during auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Key material settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Default key file.
    pub file: Option<PathBuf>,
}

/// Orchestrator timing overrides, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Reply timeout per step.
    pub read_timeout_ms: Option<u64>,
    /// Frame write timeout.
    pub write_timeout_ms: Option<u64>,
    /// Pause between steps.
    pub step_settle_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Key file configuration.
    #[serde(default)]
    pub keys: KeysConfig,
    /// Injection timing.
    #[serde(default)]
    pub injection: InjectionConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "keyinject").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        self.port.usb_device.extend(other.port.usb_device);

        if other.keys.file.is_some() {
            self.keys.file = other.keys.file;
        }

        let injection = other.injection;
        if injection.read_timeout_ms.is_some() {
            self.injection.read_timeout_ms = injection.read_timeout_ms;
        }
        if injection.write_timeout_ms.is_some() {
            self.injection.write_timeout_ms = injection.write_timeout_ms;
        }
        if injection.step_settle_ms.is_some() {
            self.injection.step_settle_ms = injection.step_settle_ms;
        }
    }

    /// Orchestrator timing with configured overrides applied.
    pub fn timing(&self) -> InjectionTiming {
        let mut timing = InjectionTiming::default();
        if let Some(ms) = self.injection.read_timeout_ms {
            timing = timing.with_read_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.injection.write_timeout_ms {
            timing = timing.with_write_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.injection.step_settle_ms {
            timing.step_settle = Duration::from_millis(ms);
        }
        timing
    }

    /// Whether `vid:pid` was configured as a terminal link.
    pub fn is_configured_device(&self, vid: u16, pid: u16) -> bool {
        self.port
            .usb_device
            .iter()
            .any(|d| d.matches(vid, pid))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::tempdir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.connection.baud.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.keys.file.is_none());
        assert_eq!(config.timing(), InjectionTiming::default());
    }

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x1A86,
            pid: 0x7523,
        };
        assert!(device.matches(0x1A86, 0x7523));
        assert!(!device.matches(0x1A86, 0x7522));
        assert!(!device.matches(0x10C4, 0x7523));
    }

    #[test]
    fn test_config_merge_overrides_set_fields_only() {
        let mut base = Config::default();
        base.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.port.connection.baud = Some(9600);

        let mut other = Config::default();
        other.port.connection.baud = Some(115200);
        other.keys.file = Some(PathBuf::from("keys.toml"));
        other.injection.read_timeout_ms = Some(2000);
        base.merge(other);

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.port.connection.baud, Some(115200));
        assert_eq!(base.keys.file, Some(PathBuf::from("keys.toml")));
        assert_eq!(base.injection.read_timeout_ms, Some(2000));
    }

    #[test]
    fn test_config_merge_usb_devices_accumulate() {
        let mut base = Config::default();
        base.port.usb_device.push(UsbDevice { vid: 1, pid: 2 });
        let mut other = Config::default();
        other.port.usb_device.push(UsbDevice { vid: 3, pid: 4 });
        base.merge(other);
        assert!(base.is_configured_device(1, 2));
        assert!(base.is_configured_device(3, 4));
        assert!(!base.is_configured_device(5, 6));
    }

    #[test]
    fn test_timing_overrides() {
        let mut config = Config::default();
        config.injection.read_timeout_ms = Some(3000);
        config.injection.step_settle_ms = Some(0);
        let timing = config.timing();
        assert_eq!(timing.read_timeout, Duration::from_secs(3));
        assert_eq!(timing.step_settle, Duration::ZERO);
        assert_eq!(timing.write_timeout, InjectionTiming::default().write_timeout);
    }

    #[test]
    fn test_load_from_path_parses_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[port.connection]
serial = "COM4"
baud = 57600

[[port.usb_device]]
vid = 0x1A86
pid = 0x7523

[keys]
file = "terminal-keys.toml"

[injection]
read_timeout_ms = 5000
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.connection.serial.as_deref(), Some("COM4"));
        assert_eq!(config.port.connection.baud, Some(57600));
        assert!(config.is_configured_device(0x1A86, 0x7523));
        assert_eq!(config.keys.file, Some(PathBuf::from("terminal-keys.toml")));
        assert_eq!(config.injection.read_timeout_ms, Some(5000));
    }

    #[test]
    fn test_load_from_invalid_path_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "this is [not toml").unwrap();
        let config = Config::load_from_path(&path);
        assert!(config.port.connection.serial.is_none());

        let missing = Config::load_from_path(&dir.path().join("missing.toml"));
        assert!(missing.keys.file.is_none());
    }
}
