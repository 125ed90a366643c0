use crate::domain::models::{AccRange, GyroRange, ProductLine, SidePosition};
use crate::infrastructure::bluetooth::protocol::{SCAN_PERIOD_MS, SETTLE_DELAY_MS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
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
    "gait_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Runtime parameters a device session is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub product_line: ProductLine,
    pub side_position: SidePosition,
    /// Used for decoding until the device configuration has been read.
    pub acc_range: AccRange,
    pub gyro_range: GyroRange,
    pub calibrated_pressure: bool,
    pub scan_period: Duration,
    pub settle_delay: Duration,
    /// Count used by a plain "request latest", 0 meaning since the last known serial.
    pub latest_request_length: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Settings::default().session_config()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub product_line: ProductLine,
    #[serde(default)]
    pub side_position: SidePosition,
    #[serde(default)]
    pub acc_range: AccRange,
    #[serde(default)]
    pub gyro_range: GyroRange,
    #[serde(default = "default_false")]
    pub calibrated_pressure: bool,

    // Timing
    #[serde(default = "default_scan_period_ms")]
    pub scan_period_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Samples a plain "request latest" asks for. Unset means the product default.
    #[serde(default)]
    pub latest_request_length: Option<u16>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            product_line: ProductLine::default(),
            side_position: SidePosition::default(),
            acc_range: AccRange::default(),
            gyro_range: GyroRange::default(),
            calibrated_pressure: false,
            scan_period_ms: default_scan_period_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            latest_request_length: None,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_scan_period_ms() -> u64 {
    SCAN_PERIOD_MS
}
fn default_settle_delay_ms() -> u64 {
    SETTLE_DELAY_MS
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            product_line: self.product_line,
            side_position: self.side_position,
            acc_range: self.acc_range,
            gyro_range: self.gyro_range,
            calibrated_pressure: self.calibrated_pressure,
            scan_period: Duration::from_millis(self.scan_period_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            latest_request_length: self.latest_request_length(),
        }
    }

    /// Core asks for the last 100 samples, insole for everything since the last one seen.
    pub fn latest_request_length(&self) -> u16 {
        self.latest_request_length
            .unwrap_or(match self.product_line {
                ProductLine::Core => 100,
                ProductLine::Insole => 0,
            })
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is missing or unparsable.
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}: {})",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("gait_link");
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

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
