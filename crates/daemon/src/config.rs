//! Daemon configuration management
//!
//! The configuration file never stops the daemon from starting: a missing
//! file yields defaults, and a broken one yields defaults plus a list of
//! errors that `--check-config` prints and the daemon warns about.

use common::LogSettings;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Levels accepted anywhere a log level is configured
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Default TCP port for bridged clients
pub const DEFAULT_LISTEN_PORT: u16 = 4223;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub log: LogLevels,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub network: NetworkSettings,
}

/// Per-category log levels
///
/// Categories without their own level inherit `level`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogLevels {
    #[serde(default = "LogLevels::default_level")]
    pub level: String,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub usb: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub hotplug: Option<String>,
}

impl Default for LogLevels {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            event: None,
            usb: None,
            network: None,
            hotplug: None,
        }
    }
}

impl LogLevels {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsbSettings {
    /// Device filters ("0xVID:0xPID", "0xVID:*", "*:*"); empty allows all
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "NetworkSettings::default_address")]
    pub listen_address: String,
    #[serde(default = "NetworkSettings::default_port")]
    pub listen_port: u16,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen_address: Self::default_address(),
            listen_port: Self::default_port(),
        }
    }
}

impl NetworkSettings {
    fn default_address() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_LISTEN_PORT
    }

    /// Socket address string suitable for `TcpListener::bind`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}

/// Log categories with independently configurable levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Event,
    Usb,
    Network,
    Hotplug,
    Other,
}

impl LogCategory {
    pub const ALL: [LogCategory; 5] = [
        LogCategory::Event,
        LogCategory::Usb,
        LogCategory::Network,
        LogCategory::Hotplug,
        LogCategory::Other,
    ];

    /// Module path targets covered by this category
    ///
    /// `Other` has no explicit targets: it is the filter's default level.
    pub fn targets(self) -> &'static [&'static str] {
        match self {
            LogCategory::Event => &[crate::event_loop::LOG_TARGET],
            LogCategory::Usb => &[crate::usb::LOG_TARGET],
            LogCategory::Network => &[crate::network::LOG_TARGET],
            LogCategory::Hotplug => &[crate::listener::LOG_TARGET, crate::relay::LOG_TARGET],
            LogCategory::Other => &[],
        }
    }
}

/// Result of loading a configuration file
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DaemonConfig,
    pub path: PathBuf,
    pub errors: Vec<String>,
}

impl LoadedConfig {
    /// Whether anything in the file had to be replaced by defaults
    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl DaemonConfig {
    /// Load configuration from `path`, collecting errors instead of failing
    pub fn load(path: &Path) -> LoadedConfig {
        let mut loaded = LoadedConfig {
            config: DaemonConfig::default(),
            path: path.to_path_buf(),
            errors: Vec::new(),
        };

        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return loaded;
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                loaded
                    .errors
                    .push(format!("Failed to read config file {}: {}", path.display(), e));
                return loaded;
            }
        };

        let config: DaemonConfig = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                loaded
                    .errors
                    .push(format!("Failed to parse config file {}: {}", path.display(), e));
                return loaded;
            }
        };

        let errors = config.validate();
        if errors.is_empty() {
            loaded.config = config;
        } else {
            loaded.errors = errors;
        }

        loaded
    }

    /// Default configuration file path: next to the executable
    pub fn default_path() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe) => exe.with_extension("toml"),
            Err(_) => {
                if let Some(config_dir) = dirs::config_dir() {
                    config_dir.join("usb-bridged").join("usb-bridged.toml")
                } else {
                    PathBuf::from(".config/usb-bridged/usb-bridged.toml")
                }
            }
        }
    }

    /// Expand `~` in a user supplied path
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).as_ref())
    }

    /// Configured level for a category
    pub fn log_level(&self, category: LogCategory) -> &str {
        let specific = match category {
            LogCategory::Event => self.log.event.as_deref(),
            LogCategory::Usb => self.log.usb.as_deref(),
            LogCategory::Network => self.log.network.as_deref(),
            LogCategory::Hotplug => self.log.hotplug.as_deref(),
            LogCategory::Other => None,
        };
        specific.unwrap_or(&self.log.level)
    }

    /// Translate category levels into subscriber settings
    ///
    /// `debug` forces every category to `debug`.
    pub fn log_settings(&self, debug: bool, file: Option<PathBuf>) -> LogSettings {
        let level_for = |category| {
            if debug {
                "debug".to_string()
            } else {
                self.log_level(category).to_string()
            }
        };

        let mut targets = Vec::new();
        for category in LogCategory::ALL {
            for target in category.targets() {
                targets.push((target.to_string(), level_for(category)));
            }
        }

        LogSettings {
            default_level: level_for(LogCategory::Other),
            targets,
            file,
        }
    }

    /// Validate configuration values, returning every problem found
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for category in LogCategory::ALL {
            let level = self.log_level(category);
            if !VALID_LOG_LEVELS.contains(&level) {
                errors.push(format!(
                    "Invalid log level '{}' for {:?}, must be one of: {}",
                    level,
                    category,
                    VALID_LOG_LEVELS.join(", ")
                ));
            }
        }

        for filter in &self.usb.filters {
            if let Err(e) = Self::validate_filter(filter) {
                errors.push(e);
            }
        }

        if self.network.listen_port == 0 {
            errors.push("Invalid listen_port 0".to_string());
        }

        errors
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<(), String> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(format!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<(), String> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(format!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name, id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(format!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name, id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| format!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}
