//! Configuration file – reads/writes `~/.skipper/config.toml`.

use serde::{Deserialize, Serialize};
use skipper_hal::{Backoff, MoonrakerConfig};
use skipper_runtime::{ControllerTuning, LoopConfig};
use skipper_types::{ConfigError, PerAxis};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted operator configuration stored in `~/.skipper/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub firmware: FirmwareConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub axes: AxesConfig,
}

/// Where and how to reach the Moonraker host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareConfig {
    #[serde(default = "default_firmware_url")]
    pub url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
    #[serde(default = "default_homing_timeout_s")]
    pub homing_timeout_s: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(flatten)]
    pub tuning: ControllerTuning,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_park_on_shutdown")]
    pub park_on_shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// UDP address the detection listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxesConfig {
    #[serde(default = "default_pan_axis")]
    pub pan: AxisConfig,
    #[serde(default = "default_tilt_axis")]
    pub tilt: AxisConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Klipper `manual_stepper` name.
    pub stepper: String,
    /// Flip the mapping from pixel error to travel direction.
    #[serde(default)]
    pub inverted: bool,
}

fn default_firmware_url() -> String {
    "http://localhost:7125".to_string()
}
fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_connect_attempts() -> u32 {
    5
}
fn default_backoff_initial_ms() -> u64 {
    250
}
fn default_backoff_ceiling_ms() -> u64 {
    4000
}
fn default_homing_timeout_s() -> u64 {
    30
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_park_on_shutdown() -> bool {
    true
}
fn default_listen_addr() -> String {
    "127.0.0.1:5005".to_string()
}
fn default_pan_axis() -> AxisConfig {
    AxisConfig {
        stepper: "stepper_0".to_string(),
        inverted: false,
    }
}
fn default_tilt_axis() -> AxisConfig {
    AxisConfig {
        stepper: "stepper_1".to_string(),
        inverted: false,
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            url: default_firmware_url(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            homing_timeout_s: default_homing_timeout_s(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tuning: ControllerTuning::default(),
            tick_interval_ms: default_tick_interval_ms(),
            park_on_shutdown: default_park_on_shutdown(),
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            pan: default_pan_axis(),
            tilt: default_tilt_axis(),
        }
    }
}

impl Config {
    /// # Errors
    ///
    /// [`ConfigError::InvalidTuning`] for out-of-range tracking parameters
    /// or a zero tick interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracking.tuning.validate()?;
        if self.tracking.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTuning(
                "tick_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn moonraker(&self) -> MoonrakerConfig {
        let fw = &self.firmware;
        MoonrakerConfig {
            base_url: fw.url.clone(),
            request_timeout: Duration::from_millis(fw.request_timeout_ms),
            homing_timeout: Duration::from_secs(fw.homing_timeout_s),
            backoff: Backoff {
                attempts: fw.connect_attempts,
                initial: Duration::from_millis(fw.backoff_initial_ms),
                ceiling: Duration::from_millis(fw.backoff_ceiling_ms),
            },
            steppers: PerAxis::new(self.axes.pan.stepper.clone(), self.axes.tilt.stepper.clone()),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            tuning: self.tracking.tuning,
            tick_interval: Duration::from_millis(self.tracking.tick_interval_ms),
            park_on_shutdown: self.tracking.park_on_shutdown,
            inverted: PerAxis::new(self.axes.pan.inverted, self.axes.tilt.inverted),
        }
    }
}

/// `~/.skipper`, falling back to the working directory without a home.
pub fn skipper_dir() -> PathBuf {
    skipper_dir_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn skipper_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".skipper")
}

pub fn config_path() -> PathBuf {
    skipper_dir().join("config.toml")
}

/// Load the config, falling back to defaults when the file is absent, with
/// `SKIPPER_*` overrides applied.
pub fn load() -> Result<Config, ConfigError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let cfg = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    Ok(Some(cfg))
}

/// Apply `SKIPPER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SKIPPER_FIRMWARE_URL` | `firmware.url` |
/// | `SKIPPER_LISTEN_ADDR` | `vision.listen_addr` |
/// | `SKIPPER_IDLE_TIMEOUT_S` | `tracking.idle_timeout_s` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SKIPPER_FIRMWARE_URL") {
        cfg.firmware.url = v;
    }
    if let Ok(v) = std::env::var("SKIPPER_LISTEN_ADDR") {
        cfg.vision.listen_addr = v;
    }
    if let Some(secs) = std::env::var("SKIPPER_IDLE_TIMEOUT_S")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
    {
        cfg.tracking.tuning.idle_timeout_s = secs;
    }
}

pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let raw = toml::to_string_pretty(cfg).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    write_private(path, &raw)
}

/// Write `contents` to `path`, creating the parent directory. On Unix the
/// directory is `0o700` and the file `0o600`.
pub(crate) fn write_private(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source: std::io::Error| ConfigError::Io { path, source }
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(io_err(parent))?;
        }
    }
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(contents.as_bytes()))
            .map_err(io_err(path))?;
    }
    #[cfg(not(unix))]
    fs::write(path, contents).map_err(io_err(path))?;
    Ok(())
}
