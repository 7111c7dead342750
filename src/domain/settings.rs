use crate::domain::models::DeviceInfo;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "chessnut_move".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Connection management
    #[serde(default = "default_true")]
    pub driver_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_auto_connect_retry_ms")]
    pub auto_connect_retry_ms: u64,
    #[serde(default)]
    pub last_connected_device: Option<DeviceInfo>,

    // BLE link
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    #[serde(default = "default_device_name_patterns")]
    pub device_name_patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            driver_enabled: default_true(),
            auto_connect: default_true(),
            auto_connect_retry_ms: default_auto_connect_retry_ms(),
            last_connected_device: None,
            scan_timeout_secs: default_scan_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            write_timeout_ms: default_write_timeout_ms(),
            mtu: default_mtu(),
            device_name_patterns: default_device_name_patterns(),
        }
    }
}

fn default_auto_connect_retry_ms() -> u64 {
    1000
}
fn default_scan_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_mtu() -> u16 {
    500
}
fn default_device_name_patterns() -> Vec<String> {
    ["Chessnut", "CN Move", "ChessnutMove"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Settings {
    /// Apply `CHESSNUT_*` overrides from a key/value source (normally
    /// `std::env::vars()`).
    pub fn apply_env_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                "CHESSNUT_LOG_LEVEL" => self.log_settings.level = value.trim().to_lowercase(),
                "CHESSNUT_AUTO_CONNECT" => self.auto_connect = env_flag(value),
                "CHESSNUT_DRIVER" => {
                    self.driver_enabled = !matches!(
                        value.trim().to_lowercase().as_str(),
                        "0" | "false" | "off" | "disabled"
                    );
                }
                _ => {}
            }
        }

        if !self.driver_enabled {
            self.auto_connect = false;
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ChessnutMove");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_device(&mut self, device: &DeviceInfo) -> anyhow::Result<()> {
        if self.settings.last_connected_device.as_ref() != Some(device) {
            self.settings.last_connected_device = Some(device.clone());
            self.save()?;
        }
        Ok(())
    }
}
